#![no_main]

use libfuzzer_sys::fuzz_target;
use leakscope::{AgentConfig, ClassFile, ClassTransformer};

fuzz_target!(|data: &[u8]| {
    // Instrument whatever class the input claims to be; errors are fine, panics are not.
    let name = match ClassFile::parse(data) {
        Ok(class) => match class.name() {
            Ok(name) => name.into_owned(),
            Err(_) => return,
        },
        Err(_) => "fuzz/Target".to_string(),
    };

    let transformer = ClassTransformer::new(AgentConfig::new().with_target(&name));
    if let Ok(output) = transformer.transform(&name, data) {
        let _ = ClassFile::parse(&output);
    }
});
