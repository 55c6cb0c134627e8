//! Class level entry point of the instrumentation engine.
//!
//! [`ClassTransformer`] decides from the class name whether a class is the configured target.
//! Any other class is passed through untouched without being parsed. For the target, every
//! constructor gets a creation block before each return and the zero-argument disposal method
//! gets a disposal block at entry. The limits of each rewritten method are then recomputed and
//! the class is serialized again.
//!
//! A target class that cannot be rewritten safely is an error; nothing is emitted for it.
//!
//! # Examples
//!
//! ```rust
//! use leakscope::{
//!     classfile::builder::{ClassBuilder, MethodBuilder},
//!     AgentConfig, ClassTransformer,
//! };
//!
//! let transformer = ClassTransformer::new(AgentConfig::new().with_target("demo/Buffer"));
//!
//! let other = ClassBuilder::new("demo/Other")
//!     .method(MethodBuilder::constructor("java/lang/Object"))
//!     .build()?;
//! assert_eq!(transformer.transform("demo/Other", &other)?.as_ref(), other.as_slice());
//!
//! let target = ClassBuilder::new("demo/Buffer")
//!     .method(MethodBuilder::constructor("java/lang/Object"))
//!     .method(MethodBuilder::empty("release"))
//!     .build()?;
//! let instrumented = transformer.transform("demo.Buffer", &target)?;
//! assert!(instrumented.len() > target.len());
//! # Ok::<(), leakscope::Error>(())
//! ```

use std::borrow::Cow;

use log::{debug, info, warn};

use crate::{
    assembly::update_limits,
    classfile::{ClassFile, MethodAccessFlags, MethodDescriptor},
    config::AgentConfig,
    instrument::{
        injector::{EventKind, Injector},
        rewriter::{InstrumentationPoint, MethodRewriter},
    },
    Error, Result,
};

/// The seam an attachment layer calls on every class load.
pub trait ClassFileTransformer: Send + Sync {
    /// Returns the replacement bytes for `class_name`, or `None` to keep the class unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the class should have been transformed but could not be.
    fn transform_class(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// One instrumented method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedMethod {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Which block was inserted
    pub kind: EventKind,
    /// Number of inserted blocks
    pub blocks: usize,
    /// `max_stack` after rewriting
    pub max_stack: u16,
    /// `max_locals` after rewriting
    pub max_locals: u16,
}

/// Summary of one instrumented class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformSummary {
    /// Rewritten methods in class file order
    pub methods: Vec<InstrumentedMethod>,
    /// Target methods skipped because they have no body
    pub skipped: Vec<String>,
    /// Nested attributes dropped during rewriting
    pub dropped_attributes: Vec<String>,
}

impl TransformSummary {
    /// Total number of inserted blocks.
    #[must_use]
    pub fn blocks(&self) -> usize {
        self.methods.iter().map(|m| m.blocks).sum()
    }
}

/// Instruments the configured target class.
#[derive(Debug, Clone)]
pub struct ClassTransformer {
    config: AgentConfig,
    injector: Injector,
}

impl ClassTransformer {
    /// Creates a transformer for `config`.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let injector = Injector::new(&config);
        ClassTransformer { config, injector }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Transforms one class.
    ///
    /// `class_name` may be given in internal (`a/b/C`) or dotted form. Classes other than the
    /// target are returned borrowed and byte-identical.
    ///
    /// # Errors
    ///
    /// For the target class, returns an error if it cannot be parsed, if its own name differs
    /// from `class_name` ([`crate::Error::ClassNameMismatch`]), or if a lifecycle method cannot
    /// be rewritten.
    pub fn transform<'a>(&self, class_name: &str, class_bytes: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        self.transform_with_summary(class_name, class_bytes)
            .map(|(bytes, _)| bytes)
    }

    /// Same as [`ClassTransformer::transform`], but also returns what was instrumented.
    ///
    /// The summary is `None` exactly when the bytes are passed through borrowed.
    ///
    /// # Errors
    ///
    /// See [`ClassTransformer::transform`].
    pub fn transform_with_summary<'a>(
        &self,
        class_name: &str,
        class_bytes: &'a [u8],
    ) -> Result<(Cow<'a, [u8]>, Option<TransformSummary>)> {
        if !self.config.is_target(class_name) {
            return Ok((Cow::Borrowed(class_bytes), None));
        }

        let mut class = ClassFile::parse(class_bytes)?;
        let found = class.name()?.into_owned();
        if found != self.config.target {
            return Err(Error::ClassNameMismatch {
                expected: self.config.target.clone(),
                found,
            });
        }

        info!("Transforming {} class...", self.config.target);
        let summary = self.instrument(&mut class)?;
        info!(
            "Instrumented {} methods of {} with {} blocks",
            summary.methods.len(),
            self.config.target,
            summary.blocks()
        );

        Ok((Cow::Owned(class.to_bytes()?), Some(summary)))
    }

    /// Instruments the lifecycle methods of an already parsed class in place.
    ///
    /// The class name is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingCode`] if a concrete lifecycle method has no `Code`
    /// attribute, and any error raised while rewriting or recomputing limits.
    pub fn instrument(&self, class: &mut ClassFile) -> Result<TransformSummary> {
        let rewriter = MethodRewriter::new(&self.injector);
        let mut summary = TransformSummary::default();
        let ClassFile {
            constant_pool: pool,
            methods,
            ..
        } = class;

        for method in methods.iter_mut() {
            let name = method.name(pool)?.into_owned();
            let descriptor = method.descriptor(pool)?.into_owned();
            let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);

            let (point, kind) = if name == "<init>" {
                (InstrumentationPoint::BeforeReturn, EventKind::Creation)
            } else if name == self.config.dispose && descriptor == "()V" && !is_static {
                (InstrumentationPoint::MethodEntry, EventKind::Disposal)
            } else {
                continue;
            };

            if method.access_flags.is_bodiless() {
                warn!("Skipping {name}{descriptor}, it has no body");
                summary.skipped.push(format!("{name}{descriptor}"));
                continue;
            }

            let code = method
                .code(pool)?
                .ok_or_else(|| Error::MissingCode(format!("{name}{descriptor}")))?;
            let mut rewritten = rewriter.rewrite(&code, point, kind, pool)?;
            update_limits(
                &mut rewritten.code,
                pool,
                &MethodDescriptor::parse(&descriptor)?,
                is_static,
            )?;
            method.set_code(pool, &rewritten.code)?;

            debug!(
                "Instrumented {name}{descriptor} with {} {kind} block(s), max_stack {} -> {}",
                rewritten.blocks, code.max_stack, rewritten.code.max_stack
            );
            summary.dropped_attributes.append(&mut rewritten.dropped);
            summary.methods.push(InstrumentedMethod {
                name,
                descriptor,
                kind,
                blocks: rewritten.blocks,
                max_stack: rewritten.code.max_stack,
                max_locals: rewritten.code.max_locals,
            });
        }

        Ok(summary)
    }
}

impl ClassFileTransformer for ClassTransformer {
    fn transform_class(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.transform(class_name, class_bytes)? {
            Cow::Borrowed(_) => Ok(None),
            Cow::Owned(bytes) => Ok(Some(bytes)),
        }
    }
}
