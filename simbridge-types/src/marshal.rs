//! Type marshalling between the wire representation (JSON/YAML scalars,
//! sequences, and sequences-of-sequences) and the numeric matrix shape the
//! compute kernel expects (spec §4.8).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value as the compute kernel sees it after marshalling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComputeValue {
    Bool(bool),
    /// Row-major matrix; row vectors are `[[..]]` (one row), column vectors
    /// are one-element rows repeated (`N` rows of length 1).
    Matrix(Vec<Vec<f64>>),
    /// Anything that isn't numeric/bool/sequence passes through unchanged
    /// (the compute kernel may reject it).
    Other(Value),
}

/// Marshal one input value per the wire-to-compute rules:
/// - scalar integer or real → 1×1 matrix (a single IEEE-754 double)
/// - empty sequence → empty matrix
/// - 1-D sequence → 1×N row vector
/// - 2-D sequence (sequence of equal-length sequences) → N×M matrix
/// - boolean passes through unchanged
/// - anything else passes through unchanged
pub fn to_compute(value: &Value) -> ComputeValue {
    match value {
        Value::Bool(b) => ComputeValue::Bool(*b),
        Value::Number(n) => ComputeValue::Matrix(vec![vec![n.as_f64().unwrap_or(f64::NAN)]]),
        Value::Array(items) => {
            if items.is_empty() {
                return ComputeValue::Matrix(Vec::new());
            }
            if items.iter().all(|v| v.is_number()) {
                let row: Vec<f64> = items.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect();
                return ComputeValue::Matrix(vec![row]);
            }
            if items.iter().all(|v| matches!(v, Value::Array(_))) {
                let rows: Vec<Vec<f64>> = items
                    .iter()
                    .map(|row| match row {
                        Value::Array(cells) => cells.iter().map(|c| c.as_f64().unwrap_or(f64::NAN)).collect(),
                        _ => unreachable!(),
                    })
                    .collect();
                let width = rows.first().map(Vec::len).unwrap_or(0);
                if rows.iter().all(|r| r.len() == width) {
                    return ComputeValue::Matrix(rows);
                }
            }
            ComputeValue::Other(value.clone())
        }
        other => ComputeValue::Other(other.clone()),
    }
}

/// Demarshal a compute-side value back to the wire shape:
/// - 1×1 matrix → scalar
/// - 1×N or N×1 → 1-D sequence
/// - N×M (both > 1) → sequence-of-sequences
pub fn from_compute(value: &ComputeValue) -> Value {
    match value {
        ComputeValue::Bool(b) => Value::Bool(*b),
        ComputeValue::Other(v) => v.clone(),
        ComputeValue::Matrix(rows) => {
            let height = rows.len();
            let width = rows.first().map(Vec::len).unwrap_or(0);
            match (height, width) {
                (0, _) | (_, 0) => Value::Array(Vec::new()),
                (1, 1) => num(rows[0][0]),
                (1, _) => Value::Array(rows[0].iter().copied().map(num).collect()),
                (_, 1) => Value::Array(rows.iter().map(|r| num(r[0])).collect()),
                _ => Value::Array(
                    rows.iter()
                        .map(|row| Value::Array(row.iter().copied().map(num).collect()))
                        .collect(),
                ),
            }
        }
    }
}

fn num(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Marshal every entry of an inputs map into compute values, keyed the
/// same way.
pub fn marshal_inputs(
    inputs: &std::collections::HashMap<String, Value>,
) -> std::collections::HashMap<String, ComputeValue> {
    inputs.iter().map(|(k, v)| (k.clone(), to_compute(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_round_trips() {
        for v in [json!(5), json!(3.14)] {
            let compute = to_compute(&v);
            let back = from_compute(&compute);
            assert_eq!(back.as_f64().unwrap(), v.as_f64().unwrap());
        }
    }

    #[test]
    fn empty_sequence_round_trips_to_empty_array() {
        let compute = to_compute(&json!([]));
        assert_eq!(compute, ComputeValue::Matrix(Vec::new()));
        assert_eq!(from_compute(&compute), json!([]));
    }

    #[test]
    fn one_d_sequence_becomes_row_vector_and_back() {
        let input = json!([1.0, 2.0, 3.0]);
        let compute = to_compute(&input);
        assert_eq!(compute, ComputeValue::Matrix(vec![vec![1.0, 2.0, 3.0]]));
        assert_eq!(from_compute(&compute), input);
    }

    #[test]
    fn two_d_sequence_becomes_matrix_and_back() {
        let input = json!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let compute = to_compute(&input);
        assert_eq!(compute, ComputeValue::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]));
        assert_eq!(from_compute(&compute), input);
    }

    #[test]
    fn column_vector_demarshals_to_flat_sequence() {
        let compute = ComputeValue::Matrix(vec![vec![1.0], vec![2.0], vec![3.0]]);
        assert_eq!(from_compute(&compute), json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn bool_passes_through_unchanged() {
        let compute = to_compute(&json!(true));
        assert_eq!(compute, ComputeValue::Bool(true));
        assert_eq!(from_compute(&compute), json!(true));
    }

    #[test]
    fn ragged_sequence_is_not_coerced_into_a_matrix() {
        let input = json!([[1.0, 2.0], [3.0]]);
        let compute = to_compute(&input);
        assert_eq!(compute, ComputeValue::Other(input));
    }

    #[test]
    fn string_value_passes_through_unchanged() {
        let input = json!("add.m");
        assert_eq!(to_compute(&input), ComputeValue::Other(input.clone()));
    }
}
