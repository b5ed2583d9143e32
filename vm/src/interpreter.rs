//! The VMIL interpreter.
//!
//! Execution is a trampoline: [`Interpreter::step`] runs one instruction and
//! reports what the loop should do next. Calls into VMIL handlers only push a
//! frame; native-delegate handlers come back to the loop as
//! [`Step::CallNative`] and run outside instruction dispatch. Host code
//! recurses into the loop only through [`Interpreter::send`], which marks its
//! frame as the place to hand the result back.

use parking_lot::MutexGuard;

use bytecode::Instruction;
use heap::HeapInner;
use object::{
    AppObjectView, ClassRef, ClassTag, ClassView, HandlerBody, HandlerRef, HandlerView, Image,
    InternalKind, Resolution, Selector, StringView, Value, class_name, extends,
    field_offset, receiver_class, resolve_handler, string_at,
};

use crate::{
    Runtime,
    debug::Position,
    error::{Fault, Trap, VmError},
    natives::NativeContext,
    stack::{ExecutionStack, ReturnAddress},
    thread::ThreadControl,
};

/// Sent to references used as a branch condition. The answer must be an
/// integer; non-zero is true.
pub const TRUTH_SELECTOR: &str = "is_true:0";

enum Step {
    Continue,
    /// A native-delegate handler was reached. The loop performs the call and
    /// resumes the sender.
    CallNative(NativeCall),
    /// The frame that marks the current invocation returned.
    Halt(Value),
}

struct NativeCall {
    handler: HandlerRef,
    /// Arguments on the stack above the receiver.
    arg_count: u32,
    /// Sender offset to continue at.
    resume: u32,
}

struct Frame<'a> {
    view: HandlerView<'a, HeapInner>,
    pc: u32,
}

pub struct Interpreter<'a> {
    runtime: &'a Runtime,
    stack: MutexGuard<'a, ExecutionStack>,
    control: Option<&'a ThreadControl>,
    frame: Option<Frame<'a>>,
    /// Nested invocations: loop runs and native calls.
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        runtime: &'a Runtime,
        stack: MutexGuard<'a, ExecutionStack>,
        control: Option<&'a ThreadControl>,
    ) -> Self {
        Self {
            runtime,
            stack,
            control,
            frame: None,
            depth: 0,
        }
    }

    #[inline(always)]
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    #[inline(always)]
    pub fn heap(&self) -> &'a HeapInner {
        let runtime: &'a Runtime = self.runtime;
        &runtime.heap
    }

    pub fn stack(&self) -> &ExecutionStack {
        &self.stack
    }

    /// Handler and offset of the next instruction.
    pub fn position(&self) -> Option<Position> {
        self.frame
            .as_ref()
            .map(|frame| Position::new(frame.view.handler(), frame.pc))
    }

    // ── entry points ───────────────────────────────────────────────

    /// Run `handler` on `receiver` to completion. The arguments must match
    /// the handler's declared count.
    pub fn run(
        &mut self,
        handler: HandlerRef,
        receiver: Value,
        arguments: &[Value],
    ) -> Result<Value, VmError> {
        let result = self.invoke(handler, receiver, arguments);
        self.settle(result)
    }

    /// Send `selector` from outside any handler; only public handlers are
    /// reachable.
    pub fn call(
        &mut self,
        receiver: Value,
        selector: &str,
        arguments: &[Value],
    ) -> Result<Value, VmError> {
        let result = self.send(receiver, selector, arguments);
        self.settle(result)
    }

    fn settle(&self, result: Result<Value, Trap>) -> Result<Value, VmError> {
        match result {
            Ok(value) => Ok(value),
            Err(Trap::Thrown(exception)) => Err(self.unhandled(exception)),
            Err(Trap::Fault(fault)) => Err(VmError::UnhandledFault(fault)),
            Err(Trap::Fatal(error)) => Err(error),
        }
    }

    fn unhandled(&self, exception: Value) -> VmError {
        let class = match exception.app_class() {
            Some(class) => class_name(self.heap(), class).unwrap_or_else(|_| "?".to_owned()),
            None => exception.kind_name().to_owned(),
        };
        log::warn!("interpreter: unhandled exception {class}");
        VmError::UnhandledException {
            class,
            value: exception,
        }
    }

    /// Reentrant send: resolve `selector` as if sent by the running handler
    /// and run the result to completion before returning.
    ///
    /// Exceptions that escape the invoked handler come back as
    /// [`Trap::Thrown`] and continue unwinding in the caller.
    pub fn send(
        &mut self,
        receiver: Value,
        selector: &str,
        arguments: &[Value],
    ) -> Result<Value, Trap> {
        let arg_count = Selector::parse(selector)
            .map_err(|_| Fault::not_understood(selector, receiver))?
            .arg_count;
        if arg_count as usize != arguments.len() {
            return Err(Fault::program(format!(
                "{selector} takes {arg_count} arguments, {} given",
                arguments.len()
            ))
            .into());
        }
        let caller = self.frame.as_ref().map(|frame| frame.view.declaring_class());
        match self.resolve(receiver, selector, caller)? {
            Resolution::Declared(handler) => self.invoke(handler, receiver, arguments),
            Resolution::Default(handler) => {
                let selector = self.heap().alloc_string(selector)?;
                let arguments = self.heap().alloc_array(arguments)?;
                self.invoke(handler, receiver, &[selector, arguments])
            }
            Resolution::NotUnderstood => Err(Fault::not_understood(selector, receiver).into()),
        }
    }

    fn resolve(
        &self,
        receiver: Value,
        selector: &str,
        caller: Option<ClassRef>,
    ) -> Result<Resolution, Trap> {
        let Some(class) = receiver_class(self.heap(), receiver) else {
            return Ok(Resolution::NotUnderstood);
        };
        Ok(resolve_handler(self.heap(), class, selector, caller)?)
    }

    fn enter(&mut self) -> Result<(), Trap> {
        let limit = self.runtime.settings.max_native_depth;
        if self.depth >= limit {
            return Err(VmError::NativeDepth(limit).into());
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `handler` in a nested loop whose frame hands the result back here.
    fn invoke(
        &mut self,
        handler: HandlerRef,
        receiver: Value,
        arguments: &[Value],
    ) -> Result<Value, Trap> {
        let view = HandlerView::new(self.heap(), handler.obj())?;
        if view.arg_count() as usize != arguments.len() {
            return Err(Fault::program(format!(
                "handler takes {} arguments, {} given",
                view.arg_count(),
                arguments.len()
            ))
            .into());
        }

        self.enter()?;
        let result = if view.is_native() {
            self.call_native(&view, receiver, arguments)
        } else {
            self.run_boundary(view, receiver, arguments)
        };
        self.depth -= 1;
        result
    }

    fn run_boundary(
        &mut self,
        view: HandlerView<'a, HeapInner>,
        receiver: Value,
        arguments: &[Value],
    ) -> Result<Value, Trap> {
        self.stack.push(receiver)?;
        for &argument in arguments {
            self.stack.push(argument)?;
        }
        let ret = ReturnAddress::boundary(
            self.frame.as_ref().map(|frame| frame.view.handler()),
            self.frame.as_ref().map_or(0, |frame| frame.pc),
        );
        self.stack.push_frame(ret, view.local_count())?;
        let saved = self.frame.replace(Frame { view, pc: 0 });
        let result = self.drive();
        self.frame = saved;
        result
    }

    fn call_native(
        &mut self,
        view: &HandlerView<'a, HeapInner>,
        receiver: Value,
        arguments: &[Value],
    ) -> Result<Value, Trap> {
        let HandlerBody::Native { routine } = view.body() else {
            return Err(Fault::program("handler has no native routine").into());
        };
        let name = string_at(self.heap(), routine)?;
        let Some(native) = self.runtime.natives.get(&name).copied() else {
            return Err(Fault::not_understood(name, receiver).into());
        };
        if native.arity != arguments.len() {
            return Err(Fault::program(format!(
                "native {name} takes {} arguments, {} given",
                native.arity,
                arguments.len()
            ))
            .into());
        }
        log::trace!("interpreter: native {name}");
        (native.ptr)(&mut NativeContext::new(self, receiver, arguments))
    }

    // ── the loop ───────────────────────────────────────────────────

    fn drive(&mut self) -> Result<Value, Trap> {
        loop {
            let outcome = match self.step() {
                Ok(Step::Continue) => Ok(()),
                Ok(Step::Halt(value)) => return Ok(value),
                Ok(Step::CallNative(call)) => self.complete_native(call),
                Err(trap) => Err(trap),
            };
            if let Err(trap) = outcome {
                self.recover(trap)?;
            }
        }
    }

    /// Turn a failed instruction into unwinding. A fault becomes an exception
    /// once; a fault raised while delivering it is fatal.
    fn recover(&mut self, trap: Trap) -> Result<(), Trap> {
        match trap {
            Trap::Fault(fault) => {
                log::debug!("interpreter: fault: {fault}");
                let exception = self.reify(&fault)?;
                match self.throw(exception) {
                    Err(Trap::Fault(second)) => Err(VmError::UnhandledFault(second).into()),
                    other => other,
                }
            }
            Trap::Thrown(exception) => self.throw(exception),
            Trap::Fatal(error) => Err(Trap::Fatal(error)),
        }
    }

    fn reify(&self, fault: &Fault) -> Result<Value, Trap> {
        let settings = &self.runtime.settings;
        let name = match fault {
            Fault::MessageNotUnderstood { .. } => &settings.exception_classes.message_not_understood,
            Fault::InvalidCast { .. } => &settings.exception_classes.invalid_cast,
            Fault::InvalidProgram(_) => &settings.exception_classes.invalid_program,
        };
        let heap = self.heap();
        let Some(class) = heap.class_named(name) else {
            return Err(VmError::UnhandledFault(fault.clone()).into());
        };
        let exception = heap.alloc_instance(class)?;

        // the root exception's first field carries the message
        if let (Some(root), Value::Reference(_, obj)) =
            (heap.class_named(&settings.root_exception), exception)
        {
            if ClassView::new(heap, root.obj())?.field_count() > 0 {
                if let Some(offset) = field_offset(heap, class, root)? {
                    let message = heap.alloc_string(&fault.to_string())?;
                    AppObjectView::new(heap, obj)?.set_field(offset, message)?;
                }
            }
        }
        Ok(exception)
    }

    /// Unwind to the innermost try marker, popping frames as needed.
    fn throw(&mut self, exception: Value) -> Result<(), Trap> {
        loop {
            if let Some(catch) = self.stack.pop_try()? {
                log::debug!("interpreter: exception caught, catch at {catch}");
                self.stack.push(exception)?;
                self.frame_mut()?.pc = catch + 1;
                return Ok(());
            }
            let arg_count = self.frame()?.view.arg_count();
            let ret = self.stack.pop_frame(false)?;
            self.stack.release_arguments(arg_count, false)?;
            if ret.actual_return_here {
                return Err(Trap::Thrown(exception));
            }
            self.resume_at(ret)?;
        }
    }

    fn complete_native(&mut self, call: NativeCall) -> Result<(), Trap> {
        let view = HandlerView::new(self.heap(), call.handler.obj())?;
        let mut values = self.stack.pop_many(call.arg_count as usize + 1)?;
        let receiver = values.remove(0);

        self.enter()?;
        let result = self.call_native(&view, receiver, &values);
        self.depth -= 1;

        let value = result?;
        if !value.is_void() {
            self.stack.push(value)?;
        }
        self.frame_mut()?.pc = call.resume;
        Ok(())
    }

    fn frame(&self) -> Result<&Frame<'a>, Trap> {
        self.frame
            .as_ref()
            .ok_or_else(|| VmError::CorruptStack("no active handler".to_owned()).into())
    }

    fn frame_mut(&mut self) -> Result<&mut Frame<'a>, Trap> {
        self.frame
            .as_mut()
            .ok_or_else(|| VmError::CorruptStack("no active handler".to_owned()).into())
    }

    fn resume_at(&mut self, ret: ReturnAddress) -> Result<(), Trap> {
        let handler = ret
            .handler
            .ok_or_else(|| VmError::CorruptStack("frame returns to no handler".to_owned()))?;
        self.frame = Some(Frame {
            view: HandlerView::new(self.heap(), handler.obj())?,
            pc: ret.instruction_offset,
        });
        Ok(())
    }

    /// Yield and debugger gates. The stack lock is released while blocked.
    fn checkpoint(&mut self, position: Position) {
        let Some(control) = self.control else {
            return;
        };
        // only the outermost loop can give up control; nested loops sit on
        // top of a native call
        if self.depth == 1 && control.yield_point.is_requested() {
            MutexGuard::unlocked(&mut self.stack, || control.yield_point.park(position));
        }
        if control.debug.is_armed() {
            MutexGuard::unlocked(&mut self.stack, || control.debug.gate(position));
        }
    }

    fn step(&mut self) -> Result<Step, Trap> {
        let position = self
            .position()
            .ok_or_else(|| VmError::CorruptStack("no active handler".to_owned()))?;
        self.checkpoint(position);

        let frame = self.frame()?;
        let pc = frame.pc;
        let arg_count = frame.view.arg_count();
        let word = frame
            .view
            .instruction(pc)?
            .ok_or_else(|| Fault::program(format!("no instruction at offset {pc}")))?;
        let instruction = Instruction::decode(word).map_err(|e| Fault::program(e.to_string()))?;
        log::trace!("{:>6}:{pc:<4} {instruction}", position.handler.addr());

        let mut next = pc + 1;
        match instruction {
            Instruction::StoreField { field } => {
                let value = self.pop_operand()?;
                let (object, index) = self.field_slot(field)?;
                object.set_field(index, value)?;
            }
            Instruction::LoadField { field } => {
                let (object, index) = self.field_slot(field)?;
                let value = object.field(index)?;
                self.stack.push(value)?;
            }
            Instruction::StoreLocal { local } => {
                let value = self.pop_operand()?;
                self.stack.set_local(local, value)?;
            }
            Instruction::LoadLocal { local } => {
                let value = self.stack.local(local)?;
                self.stack.push(value)?;
            }
            Instruction::LoadArgument { index } => {
                let value = self.stack.argument(arg_count, index)?;
                self.stack.push(value)?;
            }
            Instruction::PushLiteralInt { value } => self.stack.push(Value::Integer(value))?,
            Instruction::PushLiteralIntExtend { value } => {
                let top = self.pop_operand()?;
                let base = top.as_integer().ok_or(Fault::cast("integer", top))?;
                let sum = base
                    .checked_add(value)
                    .ok_or_else(|| Fault::program("integer literal out of range"))?;
                self.stack.push(Value::Integer(sum))?;
            }
            Instruction::PushLiteralString { index } => {
                let value = self
                    .heap()
                    .string_value(index)
                    .ok_or_else(|| Fault::program(format!("no string table entry {index}")))?;
                self.stack.push(value)?;
            }
            Instruction::Pop => {
                self.stack.pop()?;
            }
            Instruction::Dup => {
                let value = self.stack.peek(0)?;
                self.stack.push(value)?;
            }
            Instruction::NewInstance => {
                let name = self.stack.pop()?;
                let name = self.string(name)?;
                let receiver = self.stack.argument(arg_count, 0)?;
                let heap = self.heap();
                let class = heap
                    .resolve_class(receiver_class(heap, receiver), &name)
                    .ok_or_else(|| Fault::program(format!("unknown class {name:?}")))?;
                let instance = heap.alloc_instance(class)?;
                self.stack.push(instance)?;
            }
            Instruction::SendMessage => return self.send_message(pc),
            Instruction::Return => return self.return_from(true),
            Instruction::ReturnVoid => return self.return_from(false),
            Instruction::Jump { offset } => next = jump_target(pc, offset)?,
            Instruction::JumpIfTrue { offset } => {
                let condition = self.pop_operand()?;
                if self.truth(condition)? {
                    next = jump_target(pc, offset)?;
                }
            }
            Instruction::JumpIfFalse { offset } => {
                let condition = self.pop_operand()?;
                if !self.truth(condition)? {
                    next = jump_target(pc, offset)?;
                }
            }
            Instruction::Throw => {
                let exception = self.pop_operand()?;
                self.check_throwable(exception)?;
                return Err(Trap::Thrown(exception));
            }
            Instruction::Try { catch } => self.stack.push_try(catch)?,
            Instruction::Catch { end } => {
                // reached without an exception: leave the protected region
                self.stack
                    .pop_try()?
                    .ok_or_else(|| Fault::program("catch without an open try"))?;
                next = end + 1;
            }
            Instruction::EndTryCatch => {}
        }
        self.frame_mut()?.pc = next;
        Ok(Step::Continue)
    }

    fn send_message(&mut self, pc: u32) -> Result<Step, Trap> {
        let selector_value = self.stack.pop()?;
        let selector = self.string(selector_value)?;
        // the receiver's depth is only known from a well-formed selector
        let parsed = Selector::parse(&selector).map_err(|_| Fault::malformed_selector(&selector))?;
        let arg_count = parsed.arg_count;
        let receiver = self.stack.peek(arg_count as usize)?;
        let caller = self.frame()?.view.declaring_class();
        log::trace!(
            "interpreter: send {} with {arg_count} arguments to {}",
            parsed.name(),
            receiver.kind_name()
        );

        let (handler, on_stack) = match self.resolve(receiver, &selector, Some(caller))? {
            Resolution::Declared(handler) => (handler, arg_count),
            Resolution::Default(handler) => {
                let arguments = self.stack.pop_many(arg_count as usize)?;
                let arguments = self.heap().alloc_array(&arguments)?;
                self.stack.push(selector_value)?;
                self.stack.push(arguments)?;
                (handler, 2)
            }
            Resolution::NotUnderstood => {
                return Err(Fault::not_understood(selector, receiver).into());
            }
        };

        let view = HandlerView::new(self.heap(), handler.obj())?;
        if view.arg_count() != on_stack {
            return Err(Fault::program(format!(
                "handler for {selector} takes {} arguments",
                view.arg_count()
            ))
            .into());
        }
        if view.is_native() {
            return Ok(Step::CallNative(NativeCall {
                handler,
                arg_count: on_stack,
                resume: pc + 1,
            }));
        }
        let sender = self.frame()?.view.handler();
        self.stack
            .push_frame(ReturnAddress::resume(sender, pc + 1), view.local_count())?;
        self.frame = Some(Frame { view, pc: 0 });
        Ok(Step::Continue)
    }

    fn return_from(&mut self, with_value: bool) -> Result<Step, Trap> {
        let arg_count = self.frame()?.view.arg_count();
        if with_value && self.stack.peek(0)?.is_void() {
            return Err(Fault::program("void returned as a value").into());
        }
        let ret = self.stack.pop_frame(with_value)?;
        self.stack.release_arguments(arg_count, with_value)?;
        if ret.actual_return_here {
            let value = if with_value {
                self.stack.pop()?
            } else {
                Value::Void
            };
            return Ok(Step::Halt(value));
        }
        self.resume_at(ret)?;
        Ok(Step::Continue)
    }

    // ── helpers ────────────────────────────────────────────────────

    fn pop_operand(&mut self) -> Result<Value, Trap> {
        let value = self.stack.pop()?;
        if value.is_void() {
            return Err(Fault::program("void used as an operand").into());
        }
        Ok(value)
    }

    fn string(&self, value: Value) -> Result<String, Trap> {
        match value {
            Value::Reference(ClassTag::Internal(InternalKind::String), obj) => {
                Ok(StringView::new(self.heap(), obj)?.to_owned_string()?)
            }
            other => Err(Fault::cast("string", other).into()),
        }
    }

    /// The receiver's object and the slot of the running handler's field
    /// `field`. Field indices are relative to the declaring class.
    fn field_slot(&self, field: u32) -> Result<(AppObjectView<'a, HeapInner>, u32), Trap> {
        let frame = self.frame()?;
        let receiver = self.stack.argument(frame.view.arg_count(), 0)?;
        let Value::Reference(ClassTag::App(class), obj) = receiver else {
            return Err(Fault::cast("object", receiver).into());
        };
        let heap = self.heap();
        let declaring = frame.view.declaring_class();
        let base = field_offset(heap, class, declaring)?
            .ok_or(Fault::cast("instance of the declaring class", receiver))?;
        let declared = ClassView::new(heap, declaring.obj())?.field_count();
        if field >= declared {
            return Err(Fault::program(format!(
                "field {field} not declared (class has {declared})"
            ))
            .into());
        }
        Ok((AppObjectView::new(heap, obj)?, base + field))
    }

    fn truth(&mut self, condition: Value) -> Result<bool, Trap> {
        match condition {
            Value::Null => Ok(false),
            Value::Integer(n) => Ok(n != 0),
            Value::Void => Err(Fault::program("void used as a condition").into()),
            Value::Reference(..) => {
                let answer = self.send(condition, TRUTH_SELECTOR, &[])?;
                answer
                    .as_integer()
                    .map(|n| n != 0)
                    .ok_or_else(|| Fault::cast("integer", answer).into())
            }
        }
    }

    fn check_throwable(&self, exception: Value) -> Result<(), Trap> {
        let heap = self.heap();
        let root_name = &self.runtime.settings.root_exception;
        let root = heap
            .class_named(root_name)
            .ok_or_else(|| Fault::program(format!("exception class {root_name:?} is not defined")))?;
        match exception.app_class() {
            Some(class) if extends(heap, class, root)? => Ok(()),
            _ => Err(Fault::cast("exception", exception).into()),
        }
    }
}

fn jump_target(pc: u32, offset: i32) -> Result<u32, Fault> {
    u32::try_from(i64::from(pc) + i64::from(offset))
        .map_err(|_| Fault::program(format!("jump from {pc} by {offset} leaves the handler")))
}
