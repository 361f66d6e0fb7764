//! Change-output detection.
//!
//! [`detect_change`] inspects one transaction's input and output features and
//! flags at most one output as the spender's change. Rules are evaluated as an
//! ordered cascade and the first rule that fires decides:
//!
//! 1. Coinbase or at most one output: no decision.
//! 2. Address reuse: an output pays back to an input address.
//! 3. Label reuse: an output carries the same cluster label as an input.
//! 4. Single input: exactly one output shares the input's script type.
//! 5. Several inputs and outputs:
//!    a. all inputs share a script type matched by exactly one output;
//!    b. exactly one output is smaller than every input;
//!    c. exactly one output is below the smallest input while all others are above it.

use std::collections::BTreeSet;

use crate::constants::ADDRESS_UNKNOWN;
use crate::script::ScriptType;

/// Input-side features. Addresses, labels and script types are sets; values
/// keep one entry per input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputFeatures {
    pub labels: BTreeSet<String>,
    pub addresses: BTreeSet<String>,
    pub script_types: BTreeSet<ScriptType>,
    pub values: Vec<u64>,
}

impl InputFeatures {
    /// Record one input. An empty label means "unlabelled" and is not stored.
    pub fn push(&mut self, address: &str, value: u64, label: &str) {
        if !label.is_empty() {
            self.labels.insert(label.to_string());
        }
        self.script_types.insert(ScriptType::classify(address));
        self.addresses.insert(address.to_string());
        self.values.push(value);
    }

    /// Number of distinct input addresses.
    pub fn count(&self) -> usize {
        self.addresses.len()
    }
}

/// Output-side features as parallel sequences indexed by output position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFeatures {
    pub values: Vec<u64>,
    pub addresses: Vec<String>,
    pub labels: Vec<String>,
    pub script_types: Vec<ScriptType>,
}

impl OutputFeatures {
    pub fn push(&mut self, address: &str, value: u64, label: &str) {
        self.values.push(value);
        self.addresses.push(address.to_string());
        self.labels.push(label.to_string());
        self.script_types.push(ScriptType::classify(address));
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Which rule of the cascade produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeRule {
    AddressReuse,
    LabelReuse,
    SingleInputScript,
    MultiInputScript,
    SmallerThanAllInputs,
    BelowMinimumInput,
}

/// Index of the output judged to be change, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDecision {
    pub index: usize,
    pub rule: ChangeRule,
}

impl ChangeDecision {
    fn new(index: usize, rule: ChangeRule) -> Self {
        Self { index, rule }
    }
}

/// Run the change heuristics over one transaction.
///
/// Returns `None` when no rule identifies a unique change output.
pub fn detect_change(inputs: &InputFeatures, outputs: &OutputFeatures) -> Option<ChangeDecision> {
    let num_inputs = inputs.count();
    let num_outputs = outputs.len();

    if num_outputs <= 1 || num_inputs == 0 {
        return None;
    }

    if let Some(index) = outputs
        .addresses
        .iter()
        .position(|a| a != ADDRESS_UNKNOWN && inputs.addresses.contains(a))
    {
        return Some(ChangeDecision::new(index, ChangeRule::AddressReuse));
    }

    if let Some(index) = outputs
        .labels
        .iter()
        .position(|l| !l.is_empty() && inputs.labels.contains(l))
    {
        return Some(ChangeDecision::new(index, ChangeRule::LabelReuse));
    }

    if num_inputs == 1 {
        if let Some(index) = unique_script_match(inputs, outputs) {
            return Some(ChangeDecision::new(index, ChangeRule::SingleInputScript));
        }
    }

    if num_inputs >= 2 {
        if let Some(index) = unique_script_match(inputs, outputs) {
            return Some(ChangeDecision::new(index, ChangeRule::MultiInputScript));
        }

        if let Some(index) = unique_position(&outputs.values, |v| {
            inputs.values.iter().all(|&input| v < input)
        }) {
            return Some(ChangeDecision::new(index, ChangeRule::SmallerThanAllInputs));
        }

        if let Some(&min_input) = inputs.values.iter().min() {
            if let Some(index) = unique_position(&outputs.values, |v| v < min_input) {
                let others_above = outputs
                    .values
                    .iter()
                    .enumerate()
                    .all(|(i, &v)| i == index || v > min_input);
                if others_above {
                    return Some(ChangeDecision::new(index, ChangeRule::BelowMinimumInput));
                }
            }
        }
    }

    None
}

/// If every input shares one script type and exactly one output has it,
/// return that output's index.
fn unique_script_match(inputs: &InputFeatures, outputs: &OutputFeatures) -> Option<usize> {
    if inputs.script_types.len() != 1 {
        return None;
    }
    let script_type = inputs.script_types.first()?;
    unique_position(&outputs.script_types, |t| t == *script_type)
}

/// Index of the single element satisfying `pred`, or `None` if zero or several do.
fn unique_position<T: Copy>(items: &[T], pred: impl Fn(T) -> bool) -> Option<usize> {
    let mut found = None;
    for (index, &item) in items.iter().enumerate() {
        if pred(item) {
            if found.is_some() {
                return None;
            }
            found = Some(index);
        }
    }
    found
}
