//! Optional integrations.

// --- serde_json ---
#[cfg(feature = "serde_json")]
mod json {
    use crate::types::{CondensedType, TypeKind};
    use crate::value::Value;
    use serde_json::{json, Map, Number};

    impl Value {
        /// Converts the value for dumping, resolving every entry on the way.
        ///
        /// Structs become objects (field order is kept only with serde_json's
        /// `preserve_order`), lists become arrays, non-finite floats become `null`.
        pub fn to_json(&self) -> serde_json::Value {
            match self {
                Value::Null => serde_json::Value::Null,
                Value::Bool(b) => serde_json::Value::Bool(*b),
                Value::Int(i) => serde_json::Value::Number(Number::from(*i)),
                Value::Float(f) => Number::from_f64(f64::from(*f))
                    .map_or(serde_json::Value::Null, serde_json::Value::Number),
                Value::Str(s) => serde_json::Value::String(s.to_string()),
                Value::List(list) => {
                    serde_json::Value::Array(list.iter().map(|item| item.to_json()).collect())
                }
                Value::Struct(record) => {
                    let mut map = Map::new();
                    for (name, value) in record.fields() {
                        map.insert(name.to_string(), value.to_json());
                    }
                    serde_json::Value::Object(map)
                }
            }
        }
    }

    impl From<&Value> for serde_json::Value {
        fn from(value: &Value) -> Self {
            value.to_json()
        }
    }

    impl CondensedType {
        /// Describes the type definition: id, name, description, category and parameters.
        pub fn to_json(&self) -> serde_json::Value {
            let parameters = match self.kind() {
                TypeKind::VarInt(spec) => json!({
                    "signed": spec.signed,
                    "multiplier": spec.multiplier,
                }),
                TypeKind::Int(spec) => json!({
                    "bytes": spec.bytes,
                    "signed": spec.signed,
                    "overflow": format!("{:?}", spec.overflow),
                }),
                TypeKind::String(spec) => json!({ "encoding": spec.encoding.name() }),
                TypeKind::Array(spec) => json!({
                    "element": spec.element.id(),
                    "embedding": format!("{:?}", spec.embedding),
                }),
                TypeKind::Struct(spec) => serde_json::Value::Array(
                    spec.fields()
                        .iter()
                        .map(|field| {
                            json!({
                                "name": field.name,
                                "description": field.description,
                                "type": field.ty.id(),
                                "embedding": format!("{:?}", field.embedding),
                            })
                        })
                        .collect(),
                ),
                TypeKind::Boolean | TypeKind::Float | TypeKind::BFloat16 => serde_json::Value::Null,
            };
            json!({
                "id": self.id(),
                "name": self.name(),
                "description": self.description(),
                "category": self.category().name(),
                "parameters": parameters,
            })
        }
    }
}
