use std::{
    sync::{Arc, Barrier},
    thread,
};

use leakscope::{
    tracking::{IdentityToken, TokenAllocator},
    CallPath, Registry,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

const TOKENS: i32 = 1000;
const THREADS: usize = 8;

fn shuffled_chunks(seed: u64) -> Vec<Vec<IdentityToken>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tokens: Vec<IdentityToken> = (1..=TOKENS).collect();
    tokens.shuffle(&mut rng);

    let mut chunks = vec![Vec::new(); THREADS];
    for token in tokens {
        chunks[rng.random_range(0..THREADS)].push(token);
    }
    chunks
}

fn run_concurrently<F>(registry: &Arc<Registry>, chunks: Vec<Vec<IdentityToken>>, seed: u64, op: F)
where
    F: Fn(&Registry, IdentityToken) + Send + Sync + Copy + 'static,
{
    let barrier = Arc::new(Barrier::new(chunks.len()));
    let handles: Vec<_> = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let registry = Arc::clone(registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed ^ index as u64);
                barrier.wait();
                for token in chunk {
                    if rng.random_bool(0.1) {
                        thread::yield_now();
                    }
                    op(&registry, token);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_add_then_remove_loses_nothing() {
    for seed in 0..4 {
        let registry = Arc::new(Registry::new());

        run_concurrently(&registry, shuffled_chunks(seed), seed, |registry, token| {
            registry.add(token, CallPath::new(vec![format!("Worker.run(Worker.java:{token})")]));
        });
        let report = registry.snapshot();
        assert_eq!(report.count, TOKENS as usize);
        assert_eq!(report.contexts.len(), TOKENS as usize);

        run_concurrently(&registry, shuffled_chunks(seed + 100), seed, |registry, token| {
            assert!(registry.remove(token));
        });
        assert_eq!(registry.snapshot().count, 0);
        assert!(registry.is_empty());
    }
}

#[test]
fn interleaved_add_and_remove() {
    let registry = Arc::new(Registry::new());

    // Even tokens are created and disposed by the same thread, odd tokens are only created.
    run_concurrently(&registry, shuffled_chunks(7), 7, |registry, token| {
        registry.add_trace(token, "[Main.main(Main.java:1)]");
        if token % 2 == 0 {
            registry.remove(token);
        }
        let _ = registry.snapshot();
    });

    let report = registry.snapshot();
    assert_eq!(report.count, (TOKENS / 2) as usize);
    assert_eq!(report.contexts.len(), 1);
    assert!((1..=TOKENS).step_by(2).all(|token| registry.contains(token)));
}

#[test]
fn removing_untracked_tokens_is_silent() {
    let registry = Arc::new(Registry::new());
    registry.add(1, CallPath::default());

    run_concurrently(&registry, shuffled_chunks(3), 3, |registry, token| {
        if token != 1 {
            assert!(!registry.remove(-token));
        }
    });
    assert_eq!(registry.len(), 1);
}

#[test]
fn allocated_tokens_are_unique_across_threads() {
    let allocator = Arc::new(TokenAllocator::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || (0..500).map(|_| allocator.allocate()).collect::<Vec<_>>())
        })
        .collect();

    let mut tokens: Vec<IdentityToken> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    assert_eq!(tokens.len(), THREADS * 500);
    assert!(!tokens.contains(&0));
}
