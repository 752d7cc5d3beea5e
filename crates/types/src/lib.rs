use std::cmp::Ordering;

/// A value carried by a WAL record's `old_value`/`new_value`, or materialized
/// into a checkpoint's `page_states` map by recovery.
///
/// This is a log value, not a SQL column type: three variants only, matching
/// the tagged union in the on-disk WAL payload encoding (`0=Int, 1=Double,
/// 2=String`).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i64),
    Double(f64),
    String(String),
}

impl Value {
    /// Tag byte used in the on-disk WAL encoding.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Double(_) => 1,
            Value::String(_) => 2,
        }
    }

    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Double(a), Value::Double(b)) => Some(a == b),
            (Value::String(a), Value::String(b)) => Some(a == b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn cmp_same_type_works() {
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Int(2)), Some(Less));
        assert_eq!(
            Value::Int(1).cmp_same_type(&Value::String("1".into())),
            None
        );
    }

    #[test]
    fn comparisons_require_same_type() {
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Int(2)), Some(Less));
        assert_eq!(
            Value::String("a".into()).cmp_same_type(&Value::String("a".into())),
            Some(Equal)
        );
        assert_eq!(
            Value::Double(2.0).cmp_same_type(&Value::Double(1.0)),
            Some(Greater)
        );
        assert_eq!(
            Value::Int(1).cmp_same_type(&Value::String("1".into())),
            None
        );
    }

    #[test]
    fn equality_requires_same_type() {
        assert_eq!(Value::Int(1).eq_same_type(&Value::Int(1)), Some(true));
        assert_eq!(Value::Int(1).eq_same_type(&Value::Int(2)), Some(false));
        assert_eq!(
            Value::String("abc".into()).eq_same_type(&Value::String("abc".into())),
            Some(true)
        );
        assert_eq!(
            Value::String("1".into()).eq_same_type(&Value::Int(1)),
            None
        );
    }

    #[test]
    fn tags_match_wire_encoding() {
        assert_eq!(Value::Int(0).tag(), 0);
        assert_eq!(Value::Double(0.0).tag(), 1);
        assert_eq!(Value::String(String::new()).tag(), 2);
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Int(-42),
            Value::Double(3.5),
            Value::String("Ada".into()),
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::Int(i);
            let b = Value::Int(j);
            let ord1 = a.cmp_same_type(&b);
            let ord2 = b.cmp_same_type(&a);
            match (ord1, ord2) {
                (Some(o1), Some(o2)) => assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(true),
            }
        }

        #[test]
        fn eq_reflexive(val in any::<i64>()) {
            let v = Value::Int(val);
            assert_eq!(v.eq_same_type(&v), Some(true));
        }

        #[test]
        fn string_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::String(a.clone());
            let vb = Value::String(b.clone());
            assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }
    }
}
