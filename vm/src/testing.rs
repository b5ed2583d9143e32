//! Helpers shared by the unit tests of this crate.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use bytecode::BytecodeBuilder;
use heap::{ClassDef, HeapSettings};
use object::{ClassRef, Value};

use crate::{NativeRegistry, StackSettings, Vm, VmError, VmSettings};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn settings() -> VmSettings {
    VmSettings {
        heap: HeapSettings {
            size_words: 1 << 16,
        },
        stack: StackSettings {
            initial_words: 64,
            max_words: 1 << 14,
        },
        ..Default::default()
    }
}

pub fn test_vm() -> Vm {
    test_vm_with(settings(), NativeRegistry::with_builtins())
}

pub fn test_vm_with(settings: VmSettings, natives: NativeRegistry) -> Vm {
    let _ = env_logger::builder().is_test(true).try_init();
    Vm::with_output(settings, natives, Arc::new(|_: &str| {})).expect("vm boots")
}

pub fn define(vm: &Vm, def: ClassDef) -> ClassRef {
    vm.define_class(&def).expect("class defines")
}

/// Builder that interns string operands through the VM.
pub struct Asm<'v> {
    vm: &'v Vm,
    builder: BytecodeBuilder,
}

impl Asm<'_> {
    pub fn string(&mut self, text: &str) -> &mut BytecodeBuilder {
        let index = self.vm.intern(text).expect("intern");
        self.builder.push_string(index)
    }

    pub fn send(&mut self, selector: &str) -> &mut BytecodeBuilder {
        self.string(selector).send()
    }
}

impl Deref for Asm<'_> {
    type Target = BytecodeBuilder;

    fn deref(&self) -> &Self::Target {
        &self.builder
    }
}

impl DerefMut for Asm<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.builder
    }
}

pub fn assemble(vm: &Vm, build: impl FnOnce(&mut Asm<'_>)) -> Vec<u32> {
    let mut asm = Asm {
        vm,
        builder: BytecodeBuilder::new(),
    };
    build(&mut asm);
    asm.builder.into_words().expect("valid bytecode")
}

/// Class name of an exception that escaped, panicking on anything else.
pub fn unhandled_class(result: Result<Value, VmError>) -> String {
    match result {
        Err(VmError::UnhandledException { class, .. }) => class,
        other => panic!("expected an unhandled exception, got {other:?}"),
    }
}
