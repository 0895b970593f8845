// ============================================================================
// STAGE PARAMETERS — typed tunables exposed to an external registry
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat2([[f32; 2]; 2]),
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Vec2(_) => "vec2",
            Self::Vec3(_) => "vec3",
            Self::Vec4(_) => "vec4",
            Self::Mat2(_) => "mat2",
        }
    }

    fn same_kind(&self, other: &ParamValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// UI hints carried alongside a parameter.  The pipeline never reads these.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMeta {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub step: Option<f32>,
    /// Labels for an `Int` parameter used as an enum.
    pub labels: Vec<String>,
}

impl ParamMeta {
    pub fn range(min: f32, max: f32, step: f32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            labels: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Param {
    pub name: &'static str,
    pub value: ParamValue,
    pub meta: ParamMeta,
}

/// Ordered collection of the parameters one stage declares.
#[derive(Clone, Debug, Default)]
pub struct ParamSet {
    params: Vec<Param>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: ParamValue, meta: ParamMeta) -> Self {
        self.params.push(Param { name, value, meta });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }

    /// Replace a parameter's value.  The new value must have the declared type.
    pub fn set(&mut self, name: &str, value: ParamValue) -> PipelineResult<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| PipelineError::config(format!("unknown parameter '{name}'")))?;
        if !param.value.same_kind(&value) {
            return Err(PipelineError::config(format!(
                "parameter '{}' is {}, got {}",
                name,
                param.value.kind(),
                value.kind()
            )));
        }
        param.value = value;
        Ok(())
    }

    // Typed getters fall back to a default so a draw call never fails on a
    // parameter it declared itself.

    pub fn float(&self, name: &str, default: f32) -> f32 {
        match self.get(name) {
            Some(ParamValue::Float(v)) => v,
            _ => default,
        }
    }

    pub fn int(&self, name: &str, default: i32) -> i32 {
        match self.get(name) {
            Some(ParamValue::Int(v)) => v,
            _ => default,
        }
    }

    pub fn boolean(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => v,
            _ => default,
        }
    }

    pub fn vec3(&self, name: &str, default: [f32; 3]) -> [f32; 3] {
        match self.get(name) {
            Some(ParamValue::Vec3(v)) => v,
            _ => default,
        }
    }
}

/// An external collaborator that records tunables for UI or automation.
pub trait ParameterRegistry {
    fn register(&mut self, group: &str, param: &Param);
}

/// Registry that simply keeps `(group, param)` pairs, handy for inspection.
#[derive(Debug, Default)]
pub struct CollectingRegistry {
    pub entries: Vec<(String, Param)>,
}

impl ParameterRegistry for CollectingRegistry {
    fn register(&mut self, group: &str, param: &Param) {
        self.entries.push((group.to_string(), param.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParamSet {
        ParamSet::new()
            .with("threshold", ParamValue::Float(0.5), ParamMeta::range(0.0, 1.0, 0.01))
            .with("enabled", ParamValue::Bool(true), ParamMeta::default())
    }

    #[test]
    fn set_keeps_declared_type() {
        let mut set = sample();
        set.set("threshold", ParamValue::Float(0.8)).unwrap();
        assert_eq!(set.float("threshold", 0.0), 0.8);

        let err = set.set("threshold", ParamValue::Bool(false)).unwrap_err();
        assert!(err.to_string().contains("is float, got bool"));
        assert!(set.set("missing", ParamValue::Int(1)).is_err());
    }

    #[test]
    fn typed_getters_fall_back() {
        let set = sample();
        assert!(set.boolean("enabled", false));
        assert_eq!(set.int("threshold", 7), 7);
        assert_eq!(set.vec3("nope", [1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn values_serialize_with_type_tags() {
        let json = serde_json::to_string(&ParamValue::Vec2([1.0, 2.0])).unwrap();
        assert_eq!(json, r#"{"type":"vec2","value":[1.0,2.0]}"#);
    }
}
