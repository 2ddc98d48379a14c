use super::scope::FrameLayout;
use super::value::Value;

/// Storage for one function activation (or the globals).
#[derive(Debug, Default)]
pub struct Frame {
    slots: Vec<Value>,
    heap: Vec<Option<Value>>,
    args: Vec<Value>,
}

impl Frame {
    pub fn new(layout: FrameLayout, args: Vec<Value>) -> Self {
        Self {
            slots: vec![Value::Void; layout.slots],
            heap: vec![None; layout.heap_slots],
            args,
        }
    }

    pub fn get(&self, index: usize) -> Value {
        self.slots.get(index).cloned().unwrap_or(Value::Void)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = value;
        }
    }

    /// The array/struct reference stored in a heap slot, if it has been
    /// declared yet.
    pub fn heap(&self, index: usize) -> Option<&Value> {
        self.heap.get(index).and_then(Option::as_ref)
    }

    pub fn set_heap(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.heap.get_mut(index) {
            *slot = Some(value);
        }
    }

    pub fn argument(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Void)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::types::NumKind;

    #[test]
    fn heap_slots_alias_their_value() {
        let mut frame = Frame::new(FrameLayout { slots: 1, heap_slots: 1 }, vec![]);
        assert!(frame.heap(0).is_none());
        frame.set_heap(0, Value::new_array(NumKind::I32, 3));

        let first = frame.heap(0).cloned().unwrap();
        if let Value::Array(arr) = &first {
            arr.borrow_mut().elements[1] = Value::I32(4);
        }
        let Some(Value::Array(arr)) = frame.heap(0) else { panic!() };
        assert_eq!(arr.borrow().elements[1], Value::I32(4));
    }

    #[test]
    fn slots_and_arguments() {
        let mut frame = Frame::new(FrameLayout { slots: 2, heap_slots: 0 }, vec![Value::I64(7)]);
        frame.set(1, Value::U32(3));
        assert_eq!(frame.get(1), Value::U32(3));
        assert_eq!(frame.argument(0), Value::I64(7));
        assert_eq!(frame.argument(1), Value::Void);
    }
}
