//! Host structures → [`Value`] via serde.
//!
//! Field names follow the serde external name, options collapse to `None`
//! when absent, and map keys must be scalars (stringified on the way in).
//! Anything the value model cannot represent is a [`MarshalError`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::ser::{self, Serialize};
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("{0}")]
    Custom(String),

    #[error("unit struct {0} has no value representation")]
    UnitStruct(&'static str),

    #[error("map key must be a string, bool or integer, got {0}")]
    MapKey(&'static str),

    #[error("integer {0} does not fit in a signed 64-bit value")]
    OutOfRange(String),

    #[error("value does not match the target type: {0}")]
    Unmarshal(String),
}

impl ser::Error for MarshalError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        MarshalError::Custom(msg.to_string())
    }
}

/// Convert any serializable host value into a [`Value`].
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, MarshalError> {
    value.serialize(ValueSerializer)
}

/// Convert a [`Value`] back into a host type through its wire form.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, MarshalError> {
    serde_json::from_value(value.to_json()).map_err(|e| MarshalError::Unmarshal(e.to_string()))
}

fn int<T: TryInto<i64> + ToString + Copy>(v: T) -> Result<Value, MarshalError> {
    v.try_into()
        .map(Value::Int)
        .map_err(|_| MarshalError::OutOfRange(v.to_string()))
}

fn map_key(key: Value) -> Result<String, MarshalError> {
    match key {
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(MarshalError::MapKey(other.type_name())),
    }
}

pub struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = MarshalError;

    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = TupleVariantSerializer;
    type SerializeMap = MapSerializer;
    type SerializeStruct = MapSerializer;
    type SerializeStructVariant = StructVariantSerializer;

    fn serialize_bool(self, v: bool) -> Result<Value, MarshalError> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, MarshalError> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, MarshalError> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, MarshalError> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, MarshalError> {
        Ok(Value::Int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, MarshalError> {
        int(v)
    }

    fn serialize_u8(self, v: u8) -> Result<Value, MarshalError> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, MarshalError> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, MarshalError> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, MarshalError> {
        int(v)
    }

    fn serialize_u128(self, v: u128) -> Result<Value, MarshalError> {
        int(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Value, MarshalError> {
        Ok(Value::Float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, MarshalError> {
        Ok(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> Result<Value, MarshalError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, MarshalError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, MarshalError> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> Result<Value, MarshalError> {
        Ok(Value::None)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, MarshalError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, MarshalError> {
        Ok(Value::None)
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<Value, MarshalError> {
        Err(MarshalError::UnitStruct(name))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value, MarshalError> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value, MarshalError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, MarshalError> {
        let mut map = BTreeMap::new();
        map.insert(variant.to_string(), value.serialize(ValueSerializer)?);
        Ok(Value::Dict(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqSerializer, MarshalError> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqSerializer, MarshalError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqSerializer, MarshalError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<TupleVariantSerializer, MarshalError> {
        Ok(TupleVariantSerializer {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapSerializer, MarshalError> {
        Ok(MapSerializer::default())
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<MapSerializer, MarshalError> {
        Ok(MapSerializer::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<StructVariantSerializer, MarshalError> {
        Ok(StructVariantSerializer {
            variant,
            fields: BTreeMap::new(),
        })
    }
}

pub struct SeqSerializer {
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), MarshalError> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value, MarshalError> {
        Ok(Value::List(self.items))
    }
}

impl ser::SerializeTuple for SeqSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), MarshalError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, MarshalError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), MarshalError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, MarshalError> {
        ser::SerializeSeq::end(self)
    }
}

pub struct TupleVariantSerializer {
    variant: &'static str,
    items: Vec<Value>,
}

impl ser::SerializeTupleVariant for TupleVariantSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), MarshalError> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value, MarshalError> {
        let mut map = BTreeMap::new();
        map.insert(self.variant.to_string(), Value::List(self.items));
        Ok(Value::Dict(map))
    }
}

#[derive(Default)]
pub struct MapSerializer {
    entries: BTreeMap<String, Value>,
    next_key: Option<String>,
}

impl ser::SerializeMap for MapSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), MarshalError> {
        self.next_key = Some(map_key(key.serialize(ValueSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), MarshalError> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| MarshalError::Custom("map value without a key".to_string()))?;
        self.entries.insert(key, value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value, MarshalError> {
        Ok(Value::Dict(self.entries))
    }
}

impl ser::SerializeStruct for MapSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), MarshalError> {
        self.entries
            .insert(key.to_string(), value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value, MarshalError> {
        Ok(Value::Dict(self.entries))
    }
}

pub struct StructVariantSerializer {
    variant: &'static str,
    fields: BTreeMap<String, Value>,
}

impl ser::SerializeStructVariant for StructVariantSerializer {
    type Ok = Value;
    type Error = MarshalError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), MarshalError> {
        self.fields
            .insert(key.to_string(), value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value, MarshalError> {
        let mut map = BTreeMap::new();
        map.insert(self.variant.to_string(), Value::Dict(self.fields));
        Ok(Value::Dict(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use scriptlet_core::*;
    use serde::{Deserialize, Serialize};

    fn request() -> PlacementRequest {
        let mut config = ConfigMap::new();
        config.insert("limits.cpu".into(), "0,2,4,6".into());
        let mut root = ConfigMap::new();
        root.insert("type".into(), "disk".into());
        root.insert("path".into(), "/".into());
        root.insert("pool".into(), "default".into());
        let mut devices = DeviceMap::new();
        devices.insert("root".into(), root);

        PlacementRequest {
            name: "v1".into(),
            instance_type: InstanceType::VirtualMachine,
            description: "test vm".into(),
            config,
            devices,
            profiles: vec!["default".into(), "big".into()],
            project: "default".into(),
            reason: PlacementReason::Evacuation,
        }
    }

    #[test]
    fn request_uses_external_names() {
        let v = to_value(&request()).unwrap();
        assert_eq!(v.get("type"), Some(&Value::from("virtual-machine")));
        assert_eq!(v.get("reason"), Some(&Value::from("evacuation")));
        assert_eq!(
            v.get("config").and_then(|c| c.get("limits.cpu")),
            Some(&Value::from("0,2,4,6"))
        );
        assert!(v.get("instance_type").is_none());
    }

    #[test]
    fn request_round_trips() {
        let req = request();
        let back: PlacementRequest = from_value(&to_value(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn member_list_round_trips() {
        let member = ClusterMember {
            server_name: "a".into(),
            url: "https://10.0.0.1:8443".into(),
            database: true,
            status: MemberStatus::Online,
            message: "Fully operational".into(),
            architecture: "x86_64".into(),
            failure_domain: "default".into(),
            description: String::new(),
            config: ConfigMap::new(),
            groups: vec!["default".into()],
            roles: vec!["database".into()],
        };
        let members = vec![member.clone(), member];
        let v = to_value(&members).unwrap();
        assert!(matches!(&v, Value::List(items) if items.len() == 2));
        let back: Vec<ClusterMember> = from_value(&v).unwrap();
        assert_eq!(back, members);
    }

    #[test]
    fn options_collapse_to_none() {
        let res = InstanceResources {
            cpu_cores: Some(4),
            memory_size: None,
            root_disk_size: None,
        };
        let v = to_value(&res).unwrap();
        assert_eq!(v.get("cpu_cores"), Some(&Value::Int(4)));
        assert_eq!(v.get("memory_size"), Some(&Value::None));
    }

    #[test]
    fn scalar_map_keys_are_stringified() {
        let mut m = HashMap::new();
        m.insert(7u32, "seven");
        let v = to_value(&m).unwrap();
        assert_eq!(v.get("7"), Some(&Value::from("seven")));

        let mut m = BTreeMap::new();
        m.insert(true, 1);
        assert_eq!(to_value(&m).unwrap().get("true"), Some(&Value::Int(1)));
    }

    #[test]
    fn unsupported_shapes_fail() {
        #[derive(Serialize)]
        struct Marker;
        assert_eq!(to_value(&Marker), Err(MarshalError::UnitStruct("Marker")));

        let mut m = BTreeMap::new();
        m.insert(vec![1], 1);
        assert!(matches!(to_value(&m), Err(MarshalError::MapKey("list"))));

        assert!(matches!(to_value(&u64::MAX), Err(MarshalError::OutOfRange(_))));
        assert_eq!(to_value(&(i64::MAX as u64)).unwrap(), Value::Int(i64::MAX));
    }

    #[test]
    fn enum_variants() {
        #[derive(Serialize, Deserialize)]
        enum Shape {
            Point,
            Circle(f64),
            Rect { w: i32, h: i32 },
        }
        assert_eq!(to_value(&Shape::Point).unwrap(), Value::from("Point"));
        assert_eq!(
            to_value(&Shape::Circle(1.5)).unwrap().get("Circle"),
            Some(&Value::Float(1.5))
        );
        let rect = to_value(&Shape::Rect { w: 2, h: 3 }).unwrap();
        assert_eq!(rect.get("Rect").and_then(|r| r.get("h")), Some(&Value::Int(3)));
    }

    #[test]
    fn bytes_and_chars() {
        struct Blob;
        impl Serialize for Blob {
            fn serialize<S: ser::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_bytes(b"ab")
            }
        }
        assert_eq!(to_value(&Blob).unwrap(), Value::Bytes(b"ab".to_vec()));
        assert_eq!(to_value(&'x').unwrap(), Value::from("x"));
    }
}
