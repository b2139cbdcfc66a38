use clap::ValueEnum;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::client::Record;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LoadPattern {
    Sequential,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum Phase {
    Load, // insert every record
    Run,  // read back, scan, update, delete
    All,
}

impl Phase {
    pub fn loads(self) -> bool {
        matches!(self, Phase::Load | Phase::All)
    }

    pub fn runs(self) -> bool {
        matches!(self, Phase::Run | Phase::All)
    }
}

#[derive(Debug, Clone)]
pub struct RecordShape {
    pub field_count: usize,
    pub field_length: usize,
}

/// Zero-padded so that key order matches insertion order.
pub fn record_key(index: u32) -> String {
    format!("user{:010}", index)
}

pub fn field_name(index: usize) -> String {
    format!("field{}", index)
}

/// Random printable field values, one per field
pub fn generate_record(shape: &RecordShape) -> Record {
    let mut rng = rand::thread_rng();
    (0..shape.field_count)
        .map(|i| {
            let value: Vec<u8> = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(shape.field_length)
                .collect();
            (field_name(i), value)
        })
        .collect()
}

/// The record indices owned by `client_id`, in load order.
pub fn client_indices(
    record_count: u32,
    num_clients: u32,
    client_id: u32,
    pattern: LoadPattern,
) -> Vec<u32> {
    let num_clients = num_clients.max(1);
    let mut indices: Vec<u32> = (0..record_count)
        .filter(|i| i % num_clients == client_id)
        .collect();
    if let LoadPattern::Random = pattern {
        indices.shuffle(&mut rand::thread_rng());
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_in_index_order() {
        let mut keys: Vec<String> = [100, 9, 10, 0].into_iter().map(record_key).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![record_key(0), record_key(9), record_key(10), record_key(100)]
        );
    }

    #[test]
    fn generated_record_has_requested_shape() {
        let record = generate_record(&RecordShape {
            field_count: 3,
            field_length: 16,
        });

        assert_eq!(record.len(), 3);
        for (i, (name, value)) in record.iter().enumerate() {
            assert_eq!(name, &field_name(i));
            assert_eq!(value.len(), 16);
            assert!(value.iter().all(u8::is_ascii_alphanumeric));
        }
    }

    #[test]
    fn clients_partition_the_key_space() {
        let mut all: Vec<u32> = (0..4)
            .flat_map(|id| client_indices(10, 4, id, LoadPattern::Random))
            .collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert_eq!(
            client_indices(10, 4, 1, LoadPattern::Sequential),
            vec![1, 5, 9]
        );
    }
}
