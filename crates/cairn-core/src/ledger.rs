//! Ledger-event annotation.
//!
//! Turns each transaction into signed ledger rows: one debit per input, one
//! credit per output (flagged when the change heuristics select it), and a
//! fee credit when a non-coinbase transaction spends more than it pays out.

use serde::{Deserialize, Serialize};

use crate::change::{detect_change, ChangeDecision, InputFeatures, OutputFeatures};
use crate::constants::ADDRESS_FEE;
use crate::error::CairnError;
use crate::traits::LabelLookup;
use crate::types::{BlockView, TransactionView};

/// Value leaves (`Debit`) or enters (`Credit`) an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Debit,
    Credit,
}

impl Effect {
    pub fn sign(&self) -> i8 {
        match self {
            Self::Debit => -1,
            Self::Credit => 1,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_height: u64,
    pub txid: String,
    /// Position of the row within its block, starting at 1.
    pub sort_key: u64,
    pub address: String,
    pub address_prefix: String,
    pub effect: Effect,
    pub value: u64,
    /// Cluster label of the address, empty if unlabelled.
    pub label: String,
    pub is_change: bool,
}

/// Short prefix used for address indexing: 9 characters for bech32
/// addresses, 6 otherwise.
///
/// # Examples
///
/// ```
/// use cairn_core::ledger::address_prefix;
/// assert_eq!(address_prefix("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"), "bc1qar0sr");
/// assert_eq!(address_prefix("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"), "1BoatS");
/// ```
pub fn address_prefix(address: &str) -> &str {
    let len = if address.starts_with("bc1") { 9 } else { 6 };
    match address.char_indices().nth(len) {
        Some((end, _)) => &address[..end],
        None => address,
    }
}

/// Build heuristic features for one transaction, resolving labels through `labels`.
pub fn transaction_features(
    tx: &TransactionView,
    labels: &mut impl LabelLookup,
) -> Result<(InputFeatures, OutputFeatures), CairnError> {
    let (input_labels, output_labels) = resolve_labels(tx, labels)?;
    Ok(features(tx, &input_labels, &output_labels))
}

/// Cluster labels of every input and output, in position order. Unlabelled
/// addresses map to the empty string.
fn resolve_labels(
    tx: &TransactionView,
    labels: &mut impl LabelLookup,
) -> Result<(Vec<String>, Vec<String>), CairnError> {
    let mut resolve = |address: &str| labels.label_for(address).map(Option::unwrap_or_default);
    let inputs = tx
        .inputs
        .iter()
        .map(|input| resolve(&input.address))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = tx
        .outputs
        .iter()
        .map(|output| resolve(&output.address))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((inputs, outputs))
}

fn features(
    tx: &TransactionView,
    input_labels: &[String],
    output_labels: &[String],
) -> (InputFeatures, OutputFeatures) {
    let mut inputs = InputFeatures::default();
    for (input, label) in tx.inputs.iter().zip(input_labels) {
        inputs.push(&input.address, input.value, label);
    }
    let mut outputs = OutputFeatures::default();
    for (output, label) in tx.outputs.iter().zip(output_labels) {
        outputs.push(&output.address, output.value, label);
    }
    (inputs, outputs)
}

/// Per-block annotator. Keeps the running sort key across the block's rows.
pub struct LedgerAnnotator {
    block_height: u64,
    next_sort_key: u64,
}

impl LedgerAnnotator {
    pub fn new(block_height: u64) -> Self {
        Self {
            block_height,
            next_sort_key: 1,
        }
    }

    /// Annotate every transaction of a block.
    pub fn annotate_block(
        block: &BlockView,
        labels: &mut impl LabelLookup,
    ) -> Result<Vec<LedgerEvent>, CairnError> {
        let mut annotator = Self::new(block.height);
        let mut events = Vec::new();
        for tx in &block.transactions {
            annotator.annotate(tx, labels, &mut events)?;
        }
        Ok(events)
    }

    /// Append the rows of one transaction to `events` and return the change decision.
    pub fn annotate(
        &mut self,
        tx: &TransactionView,
        labels: &mut impl LabelLookup,
        events: &mut Vec<LedgerEvent>,
    ) -> Result<Option<ChangeDecision>, CairnError> {
        let (input_labels, output_labels) = resolve_labels(tx, labels)?;
        let (inputs, outputs) = features(tx, &input_labels, &output_labels);
        let decision = detect_change(&inputs, &outputs);

        for (input, label) in tx.inputs.iter().zip(input_labels) {
            self.push(events, tx, &input.address, Effect::Debit, input.value, label, false);
        }

        for (index, (output, label)) in tx.outputs.iter().zip(output_labels).enumerate() {
            let is_change = decision.is_some_and(|d| d.index == index);
            self.push(events, tx, &output.address, Effect::Credit, output.value, label, is_change);
        }

        let (spent, paid) = (tx.input_value(), tx.output_value());
        if !tx.is_coinbase() && spent > paid {
            let sort_key = self.next_key();
            events.push(LedgerEvent {
                block_height: self.block_height,
                txid: tx.txid.clone(),
                sort_key,
                address: ADDRESS_FEE.to_string(),
                address_prefix: String::new(),
                effect: Effect::Credit,
                value: spent - paid,
                label: String::new(),
                is_change: false,
            });
        }

        Ok(decision)
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        events: &mut Vec<LedgerEvent>,
        tx: &TransactionView,
        address: &str,
        effect: Effect,
        value: u64,
        label: String,
        is_change: bool,
    ) {
        let sort_key = self.next_key();
        events.push(LedgerEvent {
            block_height: self.block_height,
            txid: tx.txid.clone(),
            sort_key,
            address: address.to_string(),
            address_prefix: address_prefix(address).to_string(),
            effect,
            value,
            label,
            is_change,
        });
    }

    fn next_key(&mut self) -> u64 {
        let key = self.next_sort_key;
        self.next_sort_key += 1;
        key
    }
}
