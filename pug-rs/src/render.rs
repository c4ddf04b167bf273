//! Program interpreter.
//!
//! Executes a [`Program`] against a locals value.  Scopes follow the
//! template language: the locals form the root scope, each `each` loop and
//! each mixin call opens a function scope, and a mixin body sees the scope
//! it was defined in rather than the caller's.  A block passed to a mixin
//! runs in the caller's scope.
//!
//! Failures are reported as [`Error::Runtime`] pointing at the last source
//! position recorded by an [`Op::Debug`] marker.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use log::trace;

use crate::error::{Diagnostic, Error, Result};
use crate::program::{Arm, Code, MixinCall, MixinDef, MixinName, ObjectAttr, Op, Program};
use crate::runtime::Runtime;
use crate::script::{eval_expr, eval_list, exec_statements, EvalContext, Object, Value};

/// Nested mixin calls allowed before rendering gives up.
const MAX_CALL_DEPTH: usize = 256;

/// Render `program` with `locals` as the root scope.
pub fn render(program: &Program, locals: &Value, runtime: &dyn Runtime) -> Result<String> {
    let mut vm = Vm::new(program, locals, runtime);
    match vm.run(&program.ops) {
        Ok(()) => Ok(vm.buf),
        Err(message) => Err(vm.failure(message)),
    }
}

// ── Scopes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<usize>,
}

/// The block passed to the mixin currently executing.
struct BlockCtx {
    ops: Arc<Vec<Op>>,
    /// Scope of the call site.
    frame: usize,
    /// Block of the call site's own mixin, visible while this block runs.
    outer: Option<Rc<BlockCtx>>,
}

/// Caller state saved while a mixin body runs.
struct Entered {
    def: Arc<MixinDef>,
    frame: usize,
    frames: usize,
    block: Option<Rc<BlockCtx>>,
    indented: bool,
}

// ── Vm ────────────────────────────────────────────────────────────────────────

struct Vm<'a> {
    program: &'a Program,
    runtime: &'a dyn Runtime,
    buf: String,
    frames: Vec<Frame>,
    current: usize,
    /// Frames below this index are referenced by a mixin definition.
    pinned: usize,
    mixins: HashMap<String, (Arc<MixinDef>, usize)>,
    block: Option<Rc<BlockCtx>>,
    indent: Vec<String>,
    depth: usize,
    line: usize,
    file: Option<Arc<Path>>,
}

type Step = std::result::Result<(), String>;

impl<'a> Vm<'a> {
    fn new(program: &'a Program, locals: &Value, runtime: &'a dyn Runtime) -> Self {
        let mut root = Frame::default();
        if program.self_namespace {
            let this = match locals {
                Value::Object(_) => locals.clone(),
                _ => Value::Object(Object::new()),
            };
            root.vars.insert("self".to_owned(), this);
        } else if let Value::Object(map) = locals {
            root.vars.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Vm {
            program,
            runtime,
            buf: String::new(),
            frames: vec![root],
            current: 0,
            pinned: 1,
            mixins: HashMap::new(),
            block: None,
            indent: Vec::new(),
            depth: 0,
            line: 0,
            file: None,
        }
    }

    fn failure(&self, message: String) -> Error {
        let mut diagnostic = Diagnostic::new("PUG:RUNTIME_ERROR", message, self.line, 0).with_file(self.file.as_deref());
        if let Some(src) = self.program.source(self.file.as_deref()) {
            diagnostic = diagnostic.with_source(src);
        }
        Error::Runtime(diagnostic)
    }

    fn push_frame(&mut self, parent: usize) -> usize {
        self.frames.push(Frame {
            vars: HashMap::new(),
            parent: Some(parent),
        });
        self.frames.len() - 1
    }

    /// Drop frames opened since `len`, keeping any a mixin still refers to.
    fn pop_frames(&mut self, len: usize) {
        self.frames.truncate(len.max(self.pinned));
    }

    fn eval(&mut self, code: &Code) -> std::result::Result<Value, String> {
        eval_expr(&code.expr, self)
    }

    // ── Execution ─────────────────────────────────────────────────────────────
    //
    // Mixin recursion goes through `step`, `call` and `run` once per level, so
    // those three stay small.  Every arm with its own temporaries lives in a
    // separate non-inlined method.

    fn run(&mut self, ops: &[Op]) -> Step {
        for op in ops {
            self.step(op)?;
        }
        Ok(())
    }

    fn step(&mut self, op: &Op) -> Step {
        match op {
            Op::Text(s) => self.buf.push_str(s),
            Op::Buffer { code, escape } => self.buffer(code, *escape)?,
            Op::Exec(script) => exec_statements(&script.stmts, self)?,
            Op::Attr {
                name,
                value,
                escape,
                terse,
            } => self.attr(name, value, *escape, *terse)?,
            Op::Class { items, terse } => self.class_attr(items, *terse)?,
            Op::Style { parts, escape, terse } => self.style_attr(parts, *escape, *terse)?,
            Op::Attrs { attrs, blocks, terse } => self.attrs(attrs, blocks, *terse)?,
            Op::If { test, then, otherwise } => {
                let branch = if self.test(test)? { then } else { otherwise };
                self.run(branch)?;
            }
            Op::Case { subject, arms } => {
                if let Some(arm) = self.choose_arm(subject, arms)? {
                    self.run(&arm.body)?;
                }
            }
            Op::Each {
                subject,
                val,
                key,
                body,
                otherwise,
            } => self.each(subject, val, key.as_deref(), body, otherwise)?,
            Op::While { test, body } => {
                while self.test(test)? {
                    self.run(body)?;
                }
            }
            Op::Mixin(def) => self.define(def),
            Op::Call(call) => self.call(call)?,
            Op::MixinBlock { indent } => self.mixin_block(indent.as_deref())?,
            Op::MixinIndent => {
                for indent in &self.indent {
                    self.buf.push_str(indent);
                }
            }
            Op::Debug { line, file } => {
                self.line = *line;
                self.file = file.clone();
            }
        }
        Ok(())
    }

    #[inline(never)]
    fn test(&mut self, code: &Code) -> std::result::Result<bool, String> {
        Ok(self.eval(code)?.truthy())
    }

    #[inline(never)]
    fn buffer(&mut self, code: &Code, escape: bool) -> Step {
        let value = self.eval(code)?;
        if !value.is_nullish() {
            let text = value.to_string();
            if escape {
                let escaped = self.runtime.escape(&text);
                self.buf.push_str(&escaped);
            } else {
                self.buf.push_str(&text);
            }
        }
        Ok(())
    }

    #[inline(never)]
    fn attr(&mut self, name: &str, value: &Code, escape: bool, terse: bool) -> Step {
        let value = self.eval(value)?;
        let out = self.runtime.attr(name, &value, escape, terse);
        self.buf.push_str(&out);
        Ok(())
    }

    #[inline(never)]
    fn class_attr(&mut self, items: &[(Code, bool)], terse: bool) -> Step {
        let classes = self.classes(items)?;
        let out = self.runtime.attr("class", &Value::Str(classes), false, terse);
        self.buf.push_str(&out);
        Ok(())
    }

    #[inline(never)]
    fn style_attr(&mut self, parts: &[Code], escape: bool, terse: bool) -> Step {
        let style = self.style(parts)?;
        let out = self.runtime.attr("style", &Value::Str(style), escape, terse);
        self.buf.push_str(&out);
        Ok(())
    }

    #[inline(never)]
    fn attrs(&mut self, attrs: &[ObjectAttr], blocks: &[Code], terse: bool) -> Step {
        let mut objects = vec![Value::Object(self.attr_object(attrs)?)];
        for block in blocks {
            objects.push(self.eval(block)?);
        }
        let merged = self.runtime.merge(&objects);
        let out = self.runtime.attrs(&merged, terse);
        self.buf.push_str(&out);
        Ok(())
    }

    #[inline(never)]
    fn choose_arm<'o>(&mut self, subject: &Code, arms: &'o [Arm]) -> std::result::Result<Option<&'o Arm>, String> {
        let subject = self.eval(subject)?;
        for arm in arms {
            for test in &arm.tests {
                if self.eval(test)?.strict_eq(&subject) {
                    return Ok(Some(arm));
                }
            }
        }
        Ok(arms.iter().find(|a| a.is_default))
    }

    /// Run `body` once per pair the runtime yields, or `otherwise` when there
    /// are none.  Pairs are produced lazily.
    #[inline(never)]
    fn each(&mut self, subject: &Code, val: &str, key: Option<&str>, body: &[Op], otherwise: &[Op]) -> Step {
        let subject = self.eval(subject)?;
        let runtime = self.runtime;
        let mut pairs = runtime.each(&subject).peekable();
        let (saved, len) = (self.current, self.frames.len());
        self.current = self.push_frame(saved);
        let result = if pairs.peek().is_none() {
            self.run(otherwise)
        } else {
            pairs.try_for_each(|(k, v)| {
                self.declare_var(val, v);
                if let Some(key) = key {
                    self.declare_var(key, k);
                }
                self.run(body)
            })
        };
        self.current = saved;
        self.pop_frames(len);
        result
    }

    fn define(&mut self, def: &Arc<MixinDef>) {
        trace!("define mixin {}", def.name);
        self.mixins.insert(def.name.clone(), (Arc::clone(def), self.current));
        self.pinned = self.pinned.max(self.current + 1);
    }

    #[inline(never)]
    fn mixin_block(&mut self, indent: Option<&str>) -> Step {
        let Some(ctx) = self.block.clone() else {
            return Ok(());
        };
        if let Some(indent) = indent {
            self.indent.push(indent.to_owned());
        }
        let saved = (self.current, self.block.take());
        self.current = ctx.frame;
        self.block = ctx.outer.clone();
        let result = self.run(&ctx.ops);
        (self.current, self.block) = saved;
        if indent.is_some() {
            self.indent.pop();
        }
        result
    }

    fn classes(&mut self, items: &[(Code, bool)]) -> std::result::Result<String, String> {
        let mut values = Vec::with_capacity(items.len());
        for (code, _) in items {
            values.push(self.eval(code)?);
        }
        let escaping: Vec<bool> = items.iter().map(|(_, e)| *e).collect();
        Ok(self.runtime.classes(&Value::Array(values), Some(&escaping)))
    }

    fn style(&mut self, parts: &[Code]) -> std::result::Result<String, String> {
        if let [single] = parts {
            let value = self.eval(single)?;
            return Ok(self.runtime.style(&value));
        }
        let mut out = String::new();
        for part in parts {
            let value = self.eval(part)?;
            let style = self.runtime.style(&value);
            out.push_str(&style);
            if !style.is_empty() && !style.ends_with(';') {
                out.push(';');
            }
        }
        Ok(out)
    }

    /// The object literal for `&attributes` merging and mixin calls.
    fn attr_object(&mut self, attrs: &[ObjectAttr]) -> std::result::Result<Object, String> {
        let mut object = Object::new();
        let classes: Vec<(Code, bool)> = attrs
            .iter()
            .filter(|a| a.name == "class")
            .map(|a| (a.value.clone(), a.escape))
            .collect();
        let styles: Vec<Code> = attrs.iter().filter(|a| a.name == "style").map(|a| a.value.clone()).collect();
        for attr in attrs {
            match attr.name.as_str() {
                "class" => {
                    if !object.contains_key("class") {
                        let classes = self.classes(&classes)?;
                        object.insert("class".to_owned(), Value::Str(classes));
                    }
                }
                "style" => {
                    if !object.contains_key("style") {
                        let style = self.style(&styles)?;
                        object.insert("style".to_owned(), Value::Str(style));
                    }
                }
                name => {
                    let value = self.eval(&attr.value)?;
                    let value = if attr.escape {
                        match value {
                            Value::Str(s) => Value::Str(self.runtime.escape(&s)),
                            other => other,
                        }
                    } else {
                        value
                    };
                    object.insert(name.to_owned(), value);
                }
            }
        }
        Ok(object)
    }

    fn call(&mut self, call: &MixinCall) -> Step {
        let entered = self.enter(call)?;
        let result = self.run(&entered.def.body);
        self.leave(entered);
        result
    }

    /// Bind arguments, `block` and `attributes` in a fresh frame and make it
    /// current.
    #[inline(never)]
    fn enter(&mut self, call: &MixinCall) -> std::result::Result<Entered, String> {
        let name = match &call.name {
            MixinName::Static(name) => name.clone(),
            MixinName::Dynamic(code) => self.eval(code)?.to_string(),
        };
        let Some((def, scope)) = self.mixins.get(&name).cloned() else {
            return Err(format!("mixin \"{name}\" is not defined"));
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err(format!("mixin \"{name}\": maximum call depth exceeded"));
        }

        let args = match &call.args {
            Some(args) => eval_list(&args.exprs, self)?,
            None => Vec::new(),
        };
        let mut attributes = self.attr_object(&call.attrs)?;
        if !call.blocks.is_empty() {
            let mut objects = vec![Value::Object(attributes)];
            for block in &call.blocks {
                objects.push(self.eval(block)?);
            }
            attributes = self.runtime.merge(&objects);
        }
        let block = call.block.as_ref().map(|ops| {
            Rc::new(BlockCtx {
                ops: Arc::clone(ops),
                frame: self.current,
                outer: self.block.clone(),
            })
        });

        let (saved_frame, len) = (self.current, self.frames.len());
        let frame = self.push_frame(scope);
        {
            let vars = &mut self.frames[frame].vars;
            let mut args = args.into_iter();
            for param in &def.params {
                vars.insert(param.clone(), args.next().unwrap_or_default());
            }
            if let Some(rest) = &def.rest {
                vars.insert(rest.clone(), Value::Array(args.collect()));
            }
            vars.insert("block".to_owned(), Value::Bool(block.is_some()));
            vars.insert("attributes".to_owned(), Value::Object(attributes));
        }
        let indented = match &call.indent {
            Some(indent) => {
                self.indent.push(indent.clone());
                true
            }
            None => false,
        };
        let saved_block = std::mem::replace(&mut self.block, block);
        self.current = frame;
        self.depth += 1;
        Ok(Entered {
            def,
            frame: saved_frame,
            frames: len,
            block: saved_block,
            indented,
        })
    }

    fn leave(&mut self, entered: Entered) {
        self.depth -= 1;
        self.current = entered.frame;
        self.block = entered.block;
        if entered.indented {
            self.indent.pop();
        }
        self.pop_frames(entered.frames);
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        let mut frame = Some(self.current);
        while let Some(i) = frame {
            let f = self.frames.get(i)?;
            if f.vars.contains_key(name) {
                return Some(i);
            }
            frame = f.parent;
        }
        None
    }
}

impl EvalContext for Vm<'_> {
    fn get_var(&self, name: &str) -> Option<Value> {
        if self.program.globals.iter().any(|g| g == name) {
            return self.runtime.global(name);
        }
        self.lookup(name).and_then(|i| self.frames[i].vars.get(name).cloned())
    }

    fn set_var(&mut self, name: &str, value: Value) {
        let i = self.lookup(name).unwrap_or(0);
        self.frames[i].vars.insert(name.to_owned(), value);
    }

    fn declare_var(&mut self, name: &str, value: Value) {
        self.frames[self.current].vars.insert(name.to_owned(), value);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
