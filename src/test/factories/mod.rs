//! Class file factories.

use crate::classfile::{
    builder::{ClassBuilder, MethodBuilder},
    FieldAccessFlags, MethodAccessFlags,
};

/// Internal name of the class built by [`widget_class`].
pub const WIDGET: &str = "test/Widget";

/// A small resource-like class.
///
/// - `<init>()V` - calls `Object.<init>` and stores `1L` into `handle`
/// - `release()V` - clears `handle`
/// - `size()I` - returns a constant
pub fn widget_class() -> Vec<u8> {
    ClassBuilder::new(WIDGET)
        .field(FieldAccessFlags::PRIVATE, "handle", "J")
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "<init>", "()V").code(|asm| {
                asm.line(3)
                    .op("aload_0")?
                    .invoke("invokespecial", "java/lang/Object", "<init>", "()V")?;
                asm.line(4)
                    .op("aload_0")?
                    .op("lconst_1")?
                    .field("putfield", WIDGET, "handle", "J")?;
                asm.line(5).op("return")?;
                Ok(())
            }),
        )
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "release", "()V").code(|asm| {
                asm.line(8)
                    .op("aload_0")?
                    .op("lconst_0")?
                    .field("putfield", WIDGET, "handle", "J")?;
                asm.line(9).op("return")?;
                Ok(())
            }),
        )
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "size", "()I").code(|asm| {
                asm.iconst(16)?.op("ireturn")?;
                Ok(())
            }),
        )
        .source_file("Widget.java")
        .build()
        .unwrap()
}

/// `test/Simple` with only a default constructor.
pub fn simple_class() -> Vec<u8> {
    ClassBuilder::new("test/Simple")
        .method(MethodBuilder::constructor("java/lang/Object"))
        .build()
        .unwrap()
}
