use mapper_types::{ScalarType, ScalarValue, Timetag, Vector};

/// One OSC-style argument. This is a sketch, not a byte-level encoder: it
/// carries exactly the variants the discovery and value messages of §6
/// need, not the full OSC type tag vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum OscValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bool(bool),
    /// A null-typed vector element; a value message whose payload is all
    /// `Nil` is a release (§6 "Value messages").
    Nil,
}

impl OscValue {
    pub fn as_scalar(&self) -> Option<ScalarValue> {
        match self {
            OscValue::I32(v) => Some(ScalarValue::I32(*v)),
            OscValue::F32(v) => Some(ScalarValue::F32(*v)),
            OscValue::F64(v) => Some(ScalarValue::F64(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OscValue::I64(v) => Some(*v),
            OscValue::I32(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<ScalarValue> for OscValue {
    fn from(v: ScalarValue) -> Self {
        match v {
            ScalarValue::I32(v) => OscValue::I32(v),
            ScalarValue::F32(v) => OscValue::F32(v),
            ScalarValue::F64(v) => OscValue::F64(v),
        }
    }
}

/// A single OSC-style message: a path, positional args, and a string-tag
/// stream (`@in`, `@sl`, `@lease`, ...). Bundling/timetags are represented
/// by stamping `time` on each message rather than modelling an `OscBundle`
/// wrapper — the in-process transport delivers messages one at a time and
/// nothing downstream needs the bundle framing itself, only the timetag it
/// would have carried.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub path: String,
    pub args: Vec<OscValue>,
    pub tags: Vec<(String, OscValue)>,
    pub time: Timetag,
}

impl OscMessage {
    pub fn new(path: impl Into<String>, time: Timetag) -> Self {
        OscMessage { path: path.into(), args: Vec::new(), tags: Vec::new(), time }
    }

    pub fn with_args(mut self, args: Vec<OscValue>) -> Self {
        self.args = args;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: OscValue) -> Self {
        self.tags.push((key.into(), value));
        self
    }

    pub fn tag(&self, key: &str) -> Option<&OscValue> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Build a value-update message carrying a full vector payload, the
    /// encoding used for both direct signal updates and slot-addressed map
    /// traffic (§6 "Value messages").
    pub fn value_update(path: impl Into<String>, value: &Vector, time: Timetag) -> Self {
        let args = (0..value.len()).map(|i| value.get_wrapped(i).into()).collect();
        OscMessage::new(path, time).with_args(args)
    }

    /// A fully-null vector of `len` elements and `ty` — the wire encoding of
    /// a release.
    pub fn release(path: impl Into<String>, len: usize, time: Timetag) -> Self {
        let _ = ScalarType::F64; // released vectors carry no type info on the wire
        OscMessage::new(path, time).with_args(vec![OscValue::Nil; len])
    }

    pub fn is_release(&self) -> bool {
        !self.args.is_empty() && self.args.iter().all(|a| matches!(a, OscValue::Nil))
    }

    /// Decode the argument vector into a typed `Vector`, honoring `ty`. Only
    /// valid when `!is_release()`.
    pub fn values_as_vector(&self, ty: ScalarType) -> Option<Vector> {
        if self.args.is_empty() || self.is_release() {
            return None;
        }
        let mut v = Vector::zeros(ty, self.args.len());
        for (i, a) in self.args.iter().enumerate() {
            v.set(i, a.as_scalar()?.cast_to(ty));
        }
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_round_trips_through_is_release() {
        let msg = OscMessage::release("/node.1/in", 3, Timetag::ZERO);
        assert!(msg.is_release());
        assert!(msg.values_as_vector(ScalarType::F32).is_none());
    }

    #[test]
    fn value_update_decodes_back_to_same_vector() {
        let v = Vector::F32(vec![1.0, 2.0, 3.0]);
        let msg = OscMessage::value_update("/node.1/in", &v, Timetag::ZERO);
        assert!(!msg.is_release());
        assert_eq!(msg.values_as_vector(ScalarType::F32), Some(v));
    }

    #[test]
    fn slot_tag_round_trips() {
        let msg = OscMessage::new("/node.1/in", Timetag::ZERO).with_tag("@sl", OscValue::I32(2));
        assert_eq!(msg.tag("@sl"), Some(&OscValue::I32(2)));
    }
}
