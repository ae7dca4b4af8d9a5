use std::{collections::BTreeMap, ops::Range};

use crate::{Net, ParamValue, Value};

/// An instance of a cell defined outside the design: for this workspace, an emitted library RAM
/// primitive.  Outputs are named ranges into the instance's output value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub kind: String,
    pub params: BTreeMap<String, ParamValue>,
    pub inputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Range<usize>>,
}

impl Instance {
    pub fn new(kind: impl Into<String>) -> Self {
        Instance { kind: kind.into(), params: Default::default(), inputs: Default::default(), outputs: Default::default() }
    }

    pub fn output_len(&self) -> usize {
        self.outputs.values().map(|range| range.end).max().unwrap_or(0)
    }

    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn add_input(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.inputs.insert(name.into(), value.into());
    }

    /// Reserves an output of the given width and returns its range.
    pub fn add_output(&mut self, name: impl Into<String>, width: usize) -> Range<usize> {
        let start = self.output_len();
        let range = start..start + width;
        self.outputs.insert(name.into(), range.clone());
        range
    }

    pub fn get_param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn get_input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn get_output(&self, name: &str) -> Option<Range<usize>> {
        self.outputs.get(name).cloned()
    }

    pub fn visit(&self, mut f: impl FnMut(Net)) {
        for val in self.inputs.values() {
            val.visit(&mut f);
        }
    }

    pub fn visit_mut(&mut self, mut f: impl FnMut(&mut Net)) {
        for val in self.inputs.values_mut() {
            val.visit_mut(&mut f);
        }
    }
}
