use super::builtins::{invoke, HostIo};
use super::error::{RuntimeError, RuntimeFailure};
use super::frame::Frame;
use super::nodes::{Place, Program, TypedExpr, TypedExprKind, TypedStmt, TypedStmtKind};
use super::scope::{FuncId, Level, SlotRef};
use super::value::{ArrayRef, StructRef, Value};

/// Largest array a script may allocate, in elements.
pub const MAX_ARRAY_LEN: i64 = 1 << 26;

/// Function names kept in a failure's stack trace.
const MAX_TRACE: usize = 32;

type Eval<T> = Result<T, RuntimeFailure>;

/// How a statement finished.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A resolved storage location. Element and field locations are
/// bounds-checked when they are created.
enum Location {
    Slot(SlotRef),
    Heap(SlotRef),
    Element(ArrayRef, usize),
    Field(StructRef, usize),
}

struct Machine<'p, 'io> {
    program: &'p Program,
    globals: Frame,
    io: HostIo<'io>,
    depth: usize,
    max_depth: usize,
}

/// Run global initializers, then `main`. Returns the exit code when `main`
/// returns a number or bool.
pub fn run(
    program: &Program,
    main: FuncId,
    io: HostIo<'_>,
    max_depth: usize,
) -> Result<Option<i64>, RuntimeFailure> {
    let mut machine = Machine {
        program,
        globals: Frame::new(program.globals, Vec::new()),
        io,
        depth: 0,
        max_depth,
    };
    machine.run_init()?;
    let value = machine.call(main, Vec::new())?;
    Ok(match value {
        Value::Void | Value::Str(_) | Value::Array(_) | Value::Struct(_) => None,
        number => Some(number.as_i64()),
    })
}

impl Machine<'_, '_> {
    fn run_init(&mut self) -> Eval<()> {
        let mut scratch = Frame::default();
        for stmt in &self.program.init {
            self.exec(stmt, &mut scratch)?;
        }
        Ok(())
    }

    fn frame<'a>(&'a mut self, local: &'a mut Frame, level: Level) -> &'a mut Frame {
        match level {
            Level::Global => &mut self.globals,
            Level::Local => local,
        }
    }

    fn call(&mut self, id: FuncId, args: Vec<Value>) -> Eval<Value> {
        let program = self.program;
        let Some(function) = program.function(id) else {
            return Err(RuntimeError::MissingFunctionBody {
                name: format!("#{id}"),
            }
            .into());
        };
        let Some(body) = &function.body else {
            return Err(RuntimeError::MissingFunctionBody {
                name: function.name.clone(),
            }
            .into());
        };
        if self.depth >= self.max_depth {
            return Err(RuntimeError::StackOverflow {
                limit: self.max_depth,
            }
            .into());
        }

        self.depth += 1;
        let mut frame = Frame::new(function.layout, args);
        let flow = self.exec(body, &mut frame);
        self.depth -= 1;

        match flow {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::zero_of(&function.ty.ret)),
            Err(mut failure) => {
                if failure.stack.len() < MAX_TRACE {
                    failure.stack.push(function.name.clone());
                }
                Err(failure)
            }
        }
    }

    // ── Statements ────────────────────────────────────────────────

    fn exec(&mut self, stmt: &TypedStmt, frame: &mut Frame) -> Eval<Flow> {
        match &stmt.kind {
            TypedStmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
            }
            TypedStmtKind::Block(stmts) => {
                for stmt in stmts {
                    match self.exec(stmt, frame)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
            }
            TypedStmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition, frame)?.as_bool() {
                    return self.exec(then_branch, frame);
                }
                if let Some(else_branch) = else_branch {
                    return self.exec(else_branch, frame);
                }
            }
            TypedStmtKind::While {
                condition,
                body,
                step,
            } => {
                while self.eval(condition, frame)?.as_bool() {
                    match self.exec(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(step) = step {
                        self.eval(step, frame)?;
                    }
                }
            }
            TypedStmtKind::DoWhile { body, condition } => loop {
                match self.exec(body, frame)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
                if !self.eval(condition, frame)?.as_bool() {
                    break;
                }
            },
            TypedStmtKind::Break => return Ok(Flow::Break),
            TypedStmtKind::Continue => return Ok(Flow::Continue),
            TypedStmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Void,
                };
                return Ok(Flow::Return(value));
            }
            TypedStmtKind::NewArray { slot, kind, len } => {
                let size = self.eval(len, frame)?.as_i64();
                let len = usize::try_from(size)
                    .ok()
                    .filter(|_| size <= MAX_ARRAY_LEN)
                    .ok_or(RuntimeError::InvalidArraySize { size })?;
                self.frame(frame, slot.level)
                    .set_heap(slot.index, Value::new_array(*kind, len));
            }
            TypedStmtKind::NewStruct { slot, ty } => {
                self.frame(frame, slot.level)
                    .set_heap(slot.index, Value::new_struct(ty));
            }
            TypedStmtKind::BindHeap { slot, value } => {
                let value = self.eval(value, frame)?;
                self.frame(frame, slot.level).set_heap(slot.index, value);
            }
        }
        Ok(Flow::Normal)
    }

    // ── Places ────────────────────────────────────────────────────

    fn heap_value(&mut self, frame: &mut Frame, slot: SlotRef) -> Eval<Value> {
        self.frame(frame, slot.level)
            .heap(slot.index)
            .cloned()
            .ok_or_else(|| RuntimeError::UninitializedHeapSlot.into())
    }

    fn locate(&mut self, place: &Place, frame: &mut Frame) -> Eval<Location> {
        match place {
            Place::Slot(slot) => Ok(Location::Slot(*slot)),
            Place::Heap(slot) => Ok(Location::Heap(*slot)),
            Place::Element { array, index } => {
                let index = self.eval(index, frame)?.as_i64();
                let Value::Array(array) = self.heap_value(frame, *array)? else {
                    return Err(RuntimeError::UninitializedHeapSlot.into());
                };
                let len = array.borrow().len();
                match usize::try_from(index) {
                    Ok(i) if i < len => Ok(Location::Element(array, i)),
                    _ => Err(RuntimeError::IndexOutOfRange { index, len }.into()),
                }
            }
            Place::Field { owner, field } => match self.heap_value(frame, *owner)? {
                Value::Struct(owner) => Ok(Location::Field(owner, *field)),
                _ => Err(RuntimeError::UninitializedHeapSlot.into()),
            },
        }
    }

    fn load(&mut self, location: &Location, frame: &mut Frame) -> Eval<Value> {
        match location {
            Location::Slot(slot) => Ok(self.frame(frame, slot.level).get(slot.index)),
            Location::Heap(slot) => self.heap_value(frame, *slot),
            Location::Element(array, i) => {
                Ok(array.borrow().elements.get(*i).cloned().unwrap_or(Value::Void))
            }
            Location::Field(owner, i) => {
                Ok(owner.borrow().fields.get(*i).cloned().unwrap_or(Value::Void))
            }
        }
    }

    fn store(&mut self, location: &Location, frame: &mut Frame, value: Value) -> Eval<Value> {
        match location {
            Location::Slot(slot) => {
                self.frame(frame, slot.level).set(slot.index, value.clone());
            }
            Location::Heap(slot) => {
                // struct assignment copies fields into the existing storage
                if let (Value::Struct(src), Ok(Value::Struct(dst))) =
                    (&value, self.heap_value(frame, *slot))
                {
                    let fields = src.borrow().fields.clone();
                    dst.borrow_mut().fields = fields;
                    return Ok(Value::Struct(dst));
                }
                self.frame(frame, slot.level).set_heap(slot.index, value.clone());
            }
            Location::Element(array, i) => {
                if let Some(element) = array.borrow_mut().elements.get_mut(*i) {
                    *element = value.clone();
                }
            }
            Location::Field(owner, i) => {
                if let Some(field) = owner.borrow_mut().fields.get_mut(*i) {
                    *field = value.clone();
                }
            }
        }
        Ok(value)
    }

    // ── Expressions ───────────────────────────────────────────────

    fn eval_all(&mut self, exprs: &[TypedExpr], frame: &mut Frame) -> Eval<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, frame)).collect()
    }

    fn eval(&mut self, expr: &TypedExpr, frame: &mut Frame) -> Eval<Value> {
        match &expr.kind {
            TypedExprKind::Literal(value) => Ok(value.clone()),
            TypedExprKind::Load(place) => {
                let location = self.locate(place, frame)?;
                self.load(&location, frame)
            }
            TypedExprKind::Argument(index) => Ok(frame.argument(*index)),
            TypedExprKind::Assign { place, value } => {
                let location = self.locate(place, frame)?;
                let value = self.eval(value, frame)?;
                self.store(&location, frame, value)
            }
            TypedExprKind::Update {
                place,
                op,
                operand,
                rhs,
                postfix,
            } => {
                let location = self.locate(place, frame)?;
                let old = self.load(&location, frame)?;
                let rhs = self.eval(rhs, frame)?;
                let mut new = op(&old.convert(*operand), &rhs);
                if let Some(kind) = expr.ty.num_kind() {
                    new = new.convert(kind);
                }
                self.store(&location, frame, new.clone())?;
                Ok(if *postfix { old } else { new })
            }
            TypedExprKind::Convert { value, to } => Ok(self.eval(value, frame)?.convert(*to)),
            TypedExprKind::Truthy(value) => Ok(Value::Bool(self.eval(value, frame)?.as_bool())),
            TypedExprKind::Binary { op, left, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                Ok(op(&left, &right))
            }
            TypedExprKind::Unary { op, operand } => Ok(op(&self.eval(operand, frame)?)),
            TypedExprKind::Logical { and, left, right } => {
                let left = self.eval(left, frame)?.as_bool();
                if left != *and {
                    return Ok(Value::Bool(left));
                }
                Ok(Value::Bool(self.eval(right, frame)?.as_bool()))
            }
            TypedExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                if self.eval(condition, frame)?.as_bool() {
                    self.eval(then_expr, frame)
                } else {
                    self.eval(else_expr, frame)
                }
            }
            TypedExprKind::Comma { first, second } => {
                self.eval(first, frame)?;
                self.eval(second, frame)
            }
            TypedExprKind::Call { function, args } => {
                let args = self.eval_all(args, frame)?;
                self.call(*function, args)
            }
            TypedExprKind::Builtin { op, args } => {
                let args = self.eval_all(args, frame)?;
                Ok(invoke(*op, &args, &mut self.io)?)
            }
            TypedExprKind::DeepCopy(value) => Ok(self.eval(value, frame)?.deep_copy()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::compile_source;

    fn run_with_depth(src: &str, depth: usize) -> (Result<Option<i64>, RuntimeFailure>, String) {
        let program = compile_source(src).unwrap();
        let mut out = Vec::new();
        let result = run(&program, program.main.unwrap(), HostIo::new(&mut out, None), depth);
        (result, String::from_utf8(out).unwrap())
    }

    fn exit_code(src: &str) -> i64 {
        run_with_depth(src, 64).0.unwrap().unwrap()
    }

    fn run_err(src: &str) -> RuntimeFailure {
        run_with_depth(src, 64).0.unwrap_err()
    }

    #[test]
    fn returns_exit_code() {
        assert_eq!(exit_code("int main() { return 6 * 7; }"), 42);
        assert_eq!(run_with_depth("void main() { }", 8).0.unwrap(), None);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let src = "int main() { int x = 2147483647; x = x + 1; return x == -2147483648; }";
        assert_eq!(exit_code(src), 1);
        assert_eq!(exit_code("int main() { unsigned int a = 0; a = a - 1; return a > 5; }"), 1);
    }

    #[test]
    fn division_by_zero_is_zero() {
        assert_eq!(exit_code("int main() { int z = 0; return 7 / z + 7 % z; }"), 0);
    }

    #[test]
    fn prefix_and_postfix_increment() {
        let src = "int main() { int i = 5; int a = i++; int b = ++i; return a * 100 + b * 10 + i; }";
        assert_eq!(exit_code(src), 577);
    }

    #[test]
    fn compound_assignment_on_elements() {
        let src = "int main() { int a[3]; int i = 0; a[i++] += 4; a[0] <<= 2; return a[0] * 10 + i; }";
        assert_eq!(exit_code(src), 161);
    }

    #[test]
    fn logical_operators_short_circuit() {
        let src = "int main() { int n = 0; if (0 && (n = 1)) { } if (1 || (n = 2)) { } return n; }";
        assert_eq!(exit_code(src), 0);
    }

    #[test]
    fn loops_and_continue() {
        let src = "int main() { int s = 0; for (int i = 0; i < 10; i++) { if (i % 2 == 0) continue; s += i; } return s; }";
        assert_eq!(exit_code(src), 25);
        let src = "int main() { int i = 0; while (1) { i++; if (i == 7) break; } return i; }";
        assert_eq!(exit_code(src), 7);
        assert_eq!(exit_code("int main() { int n = 10; do { n++; } while (n < 5); return n; }"), 11);
    }

    #[test]
    fn arrays_are_passed_by_reference() {
        let src = "void fill(int a[], int n) { for (int i = 0; i < n; i++) a[i] = i * i; }\n\
                   int main() { int a[4]; fill(a, 4); return a[3]; }";
        assert_eq!(exit_code(src), 9);
    }

    #[test]
    fn structs_are_copied() {
        let src = "struct P { int x; };\n\
                   void bump(struct P p) { p.x = 9; }\n\
                   int main() { struct P p; p.x = 1; bump(p); struct P q; q = p; q.x = 5; return p.x * 10 + q.x; }";
        assert_eq!(exit_code(src), 15);
    }

    #[test]
    fn globals_initialize_before_main() {
        let src = "int g = 5; int arr[2];\nint main() { arr[1] = g; return arr[1] + g; }";
        assert_eq!(exit_code(src), 10);
    }

    #[test]
    fn recursion() {
        let src = "long fib(int n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }\nint main() { return fib(15); }";
        assert_eq!(exit_code(src), 610);
    }

    #[test]
    fn index_out_of_range() {
        let failure = run_err("void touch(int a[]) { a[5] = 1; }\nint main() { int a[3]; touch(a); return 0; }");
        assert_eq!(failure.error, RuntimeError::IndexOutOfRange { index: 5, len: 3 });
        assert_eq!(failure.stack, vec!["touch".to_string(), "main".to_string()]);
    }

    /// Call each named function in turn on one machine, so globals
    /// survive a failing call.
    fn call_in_sequence(src: &str, names: &[&str]) -> Vec<Eval<Value>> {
        let program = compile_source(src).unwrap();
        let mut out = Vec::new();
        let mut machine = Machine {
            program: &program,
            globals: Frame::new(program.globals, Vec::new()),
            io: HostIo::new(&mut out, None),
            depth: 0,
            max_depth: 64,
        };
        machine.run_init().unwrap();
        names
            .iter()
            .map(|name| {
                let id = program.functions.iter().position(|f| f.name == *name).unwrap();
                machine.call(id, Vec::new())
            })
            .collect()
    }

    #[test]
    fn failed_element_store_leaves_array_intact() {
        let src = "int a[3];\n\
                   void fill() { a[0] = 1; a[1] = 2; a[2] = 3; }\n\
                   void bump() { a[3] += 1; }\n\
                   void poke() { a[-1] = 9; }\n\
                   void post() { int i = 3; a[i]++; }\n\
                   int digits() { return a[0] * 100 + a[1] * 10 + a[2]; }\n\
                   int main() { return 0; }";
        let results = call_in_sequence(src, &["fill", "bump", "poke", "post", "digits"]);
        let errors: Vec<_> = results
            .iter()
            .skip(1)
            .take(3)
            .map(|r| r.as_ref().unwrap_err().error.clone())
            .collect();
        assert_eq!(
            errors,
            vec![
                RuntimeError::IndexOutOfRange { index: 3, len: 3 },
                RuntimeError::IndexOutOfRange { index: -1, len: 3 },
                RuntimeError::IndexOutOfRange { index: 3, len: 3 },
            ]
        );
        assert_eq!(results.last().unwrap().as_ref().unwrap().as_i64(), 123);
    }

    #[test]
    fn negative_array_size() {
        let failure = run_err("int main() { int n = -1; int a[n]; return 0; }");
        assert_eq!(failure.error, RuntimeError::InvalidArraySize { size: -1 });
    }

    #[test]
    fn call_depth_limit() {
        let (result, _) = run_with_depth("int f(int n) { return f(n + 1); }\nint main() { return f(0); }", 16);
        let failure = result.unwrap_err();
        assert_eq!(failure.error, RuntimeError::StackOverflow { limit: 16 });
        assert!(failure.stack.iter().all(|name| name == "f" || name == "main"));
    }

    #[test]
    fn undefined_prototype() {
        let failure = run_err("int g(int x);\nint main() { return g(1); }");
        assert_eq!(failure.error, RuntimeError::MissingFunctionBody { name: "g".into() });
    }

    #[test]
    fn printf_writes_output() {
        let (result, out) = run_with_depth("int main() { printf(\"%d-%s\\n\", 42, \"ok\"); return 0; }", 8);
        assert_eq!(result.unwrap(), Some(0));
        assert_eq!(out, "42-ok\n");
    }

    #[test]
    fn shadowed_variables_are_independent() {
        let src = "int main() { int x = 1; { int x = 2; x++; } return x; }";
        assert_eq!(exit_code(src), 1);
    }
}
