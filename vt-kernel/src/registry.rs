//! The `@VT` registry: in-memory hierarchical key-value store.
//!
//! Keys form a tree under the subsystem hives `DEV`, `DRV`, and `SYS`.
//! Values are typed (`STR`, `NUM`, `BOOL`, `TAB`). Key and value order is
//! insertion order, which keeps enumeration deterministic. Mutation is
//! gated by ring at the syscall layer; reads are open.

use indexmap::IndexMap;
use vt_abi::{RegType, Status, SysError, SysResult, Value, path};

/// Root hives created at boot. Deleting them is denied.
pub const ROOT_HIVES: &[&str] = &["DEV", "DRV", "SYS"];

/// A typed registry value.
#[derive(Debug, Clone, PartialEq)]
pub enum RegValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Tab(Value),
}

impl RegValue {
    pub fn reg_type(&self) -> RegType {
        match self {
            RegValue::Str(_) => RegType::Str,
            RegValue::Num(_) => RegType::Num,
            RegValue::Bool(_) => RegType::Bool,
            RegValue::Tab(_) => RegType::Tab,
        }
    }

    /// Decode from the wire shape `{sType, vValue}` or from a bare value.
    pub fn from_value(value: &Value) -> SysResult<RegValue> {
        if let Some(map) = value.as_map() {
            if let (Some(type_name), Some(inner)) =
                (map.get("sType").and_then(Value::as_str), map.get("vValue"))
            {
                let reg_type = RegType::from_name(type_name)
                    .ok_or(SysError::with(Status::InvalidParameter, "bad value type"))?;
                return match (reg_type, inner) {
                    (RegType::Str, Value::Str(s)) => Ok(RegValue::Str(s.clone())),
                    (RegType::Num, v) => v
                        .as_number()
                        .map(RegValue::Num)
                        .ok_or(SysError::with(Status::InvalidParameter, "NUM wants a number")),
                    (RegType::Bool, Value::Bool(b)) => Ok(RegValue::Bool(*b)),
                    (RegType::Tab, v @ Value::Map(_)) => Ok(RegValue::Tab(v.clone())),
                    _ => Err(SysError::with(Status::InvalidParameter, "type/value mismatch")),
                };
            }
        }
        // Bare values infer their type.
        match value {
            Value::Str(s) => Ok(RegValue::Str(s.clone())),
            Value::Int(n) => Ok(RegValue::Num(*n as f64)),
            Value::Float(f) => Ok(RegValue::Num(*f)),
            Value::Bool(b) => Ok(RegValue::Bool(*b)),
            Value::Map(_) => Ok(RegValue::Tab(value.clone())),
            _ => Err(SysError::with(Status::InvalidParameter, "unsupported value")),
        }
    }

    pub fn to_value(&self) -> Value {
        let (type_name, inner) = match self {
            RegValue::Str(s) => ("STR", Value::from(s.as_str())),
            RegValue::Num(n) => ("NUM", Value::Float(*n)),
            RegValue::Bool(b) => ("BOOL", Value::Bool(*b)),
            RegValue::Tab(v) => ("TAB", v.clone()),
        };
        Value::map([("sType", Value::from(type_name)), ("vValue", inner)])
    }
}

/// One registry key.
#[derive(Debug, Default)]
pub struct RegKey {
    children: IndexMap<String, RegKey>,
    values: IndexMap<String, RegValue>,
}

impl RegKey {
    fn dump(&self) -> Value {
        let values: Vec<Value> = self
            .values
            .iter()
            .map(|(name, v)| {
                Value::map([("sName", Value::from(name.as_str())), ("vValue", v.to_value())])
            })
            .collect();
        let children: Vec<Value> = self
            .children
            .iter()
            .map(|(name, key)| {
                Value::map([("sName", Value::from(name.as_str())), ("tKey", key.dump())])
            })
            .collect();
        Value::map([
            ("tValues", Value::List(values)),
            ("tChildren", Value::List(children)),
        ])
    }
}

/// The registry.
pub struct Registry {
    root: RegKey,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            root: RegKey::default(),
        }
    }

    /// A registry with the subsystem hives seeded.
    pub fn with_hives() -> Registry {
        let mut reg = Registry::new();
        for hive in ROOT_HIVES {
            reg.create_key(&format!("{}\\{hive}", path::REGISTRY_ROOT))
                .expect("hive paths are valid");
        }
        reg
    }

    fn parse(&self, key_path: &str) -> SysResult<Vec<String>> {
        path::registry_components(key_path)
            .map(|parts| parts.into_iter().map(str::to_string).collect())
            .ok_or(SysError::with(
                Status::InvalidParameter,
                format!("bad registry path {key_path}"),
            ))
    }

    fn find(&self, parts: &[String]) -> Option<&RegKey> {
        let mut key = &self.root;
        for part in parts {
            key = key.children.get(part)?;
        }
        Some(key)
    }

    fn find_mut(&mut self, parts: &[String]) -> Option<&mut RegKey> {
        let mut key = &mut self.root;
        for part in parts {
            key = key.children.get_mut(part)?;
        }
        Some(key)
    }

    /// Create a key (and any missing parents). Idempotent.
    pub fn create_key(&mut self, key_path: &str) -> SysResult<()> {
        let parts = self.parse(key_path)?;
        let mut key = &mut self.root;
        for part in parts {
            key = key.children.entry(part).or_default();
        }
        Ok(())
    }

    /// Delete a key and its subtree. Root hives are protected.
    pub fn delete_key(&mut self, key_path: &str) -> SysResult<()> {
        let parts = self.parse(key_path)?;
        match parts.len() {
            0 => return Err(SysError::with(Status::AccessDenied, "cannot delete the root")),
            1 if ROOT_HIVES.contains(&parts[0].as_str()) => {
                return Err(SysError::with(Status::AccessDenied, "cannot delete a root hive"));
            }
            _ => {}
        }
        let (leaf, parents) = parts.split_last().expect("checked non-empty");
        let parent = self
            .find_mut(parents)
            .ok_or(SysError::new(Status::NoSuchFile))?;
        parent
            .children
            .shift_remove(leaf)
            .map(|_| ())
            .ok_or(SysError::new(Status::NoSuchFile))
    }

    pub fn set_value(&mut self, key_path: &str, name: &str, value: RegValue) -> SysResult<()> {
        let parts = self.parse(key_path)?;
        let key = self
            .find_mut(&parts)
            .ok_or(SysError::new(Status::NoSuchFile))?;
        key.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get_value(&self, key_path: &str, name: &str) -> SysResult<&RegValue> {
        let parts = self.parse(key_path)?;
        self.find(&parts)
            .ok_or(SysError::new(Status::NoSuchFile))?
            .values
            .get(name)
            .ok_or(SysError::new(Status::NoSuchFile))
    }

    pub fn delete_value(&mut self, key_path: &str, name: &str) -> SysResult<()> {
        let parts = self.parse(key_path)?;
        let key = self
            .find_mut(&parts)
            .ok_or(SysError::new(Status::NoSuchFile))?;
        key.values
            .shift_remove(name)
            .map(|_| ())
            .ok_or(SysError::new(Status::NoSuchFile))
    }

    /// Child key names, in creation order.
    pub fn enum_keys(&self, key_path: &str) -> SysResult<Vec<String>> {
        let parts = self.parse(key_path)?;
        Ok(self
            .find(&parts)
            .ok_or(SysError::new(Status::NoSuchFile))?
            .children
            .keys()
            .cloned()
            .collect())
    }

    /// Value names, in creation order.
    pub fn enum_values(&self, key_path: &str) -> SysResult<Vec<String>> {
        let parts = self.parse(key_path)?;
        Ok(self
            .find(&parts)
            .ok_or(SysError::new(Status::NoSuchFile))?
            .values
            .keys()
            .cloned()
            .collect())
    }

    /// Dump a whole subtree as a value tree.
    pub fn dump_tree(&self, key_path: &str) -> SysResult<Value> {
        let parts = self.parse(key_path)?;
        Ok(self
            .find(&parts)
            .ok_or(SysError::new(Status::NoSuchFile))?
            .dump())
    }

    /// Allocate the next unused device id within a class. Ids start at 0
    /// and the cursor lives at `@VT\DEV\<class>.nNextId`.
    pub fn alloc_device_id(&mut self, class: &str) -> SysResult<u32> {
        let key_path = format!("{}\\DEV\\{class}", path::REGISTRY_ROOT);
        self.create_key(&key_path)?;
        let current = match self.get_value(&key_path, "nNextId") {
            Ok(RegValue::Num(n)) => *n as u32,
            _ => 0,
        };
        self.set_value(&key_path, "nNextId", RegValue::Num((current + 1) as f64))?;
        Ok(current)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_hives()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_round_trips_each_type() {
        let mut reg = Registry::with_hives();
        reg.create_key("@VT\\SYS\\boot").unwrap();

        reg.set_value("@VT\\SYS\\boot", "sEntry", RegValue::Str("kernel".into()))
            .unwrap();
        reg.set_value("@VT\\SYS\\boot", "nTimeout", RegValue::Num(3.0))
            .unwrap();
        reg.set_value("@VT\\SYS\\boot", "bQuiet", RegValue::Bool(true))
            .unwrap();
        reg.set_value(
            "@VT\\SYS\\boot",
            "tExtra",
            RegValue::Tab(Value::map([("x", Value::Int(1))])),
        )
        .unwrap();

        assert_eq!(
            reg.get_value("@VT\\SYS\\boot", "sEntry").unwrap(),
            &RegValue::Str("kernel".into())
        );
        assert_eq!(
            reg.get_value("@VT\\SYS\\boot", "nTimeout").unwrap(),
            &RegValue::Num(3.0)
        );
        assert_eq!(
            reg.get_value("@VT\\SYS\\boot", "bQuiet").unwrap(),
            &RegValue::Bool(true)
        );
        assert_eq!(
            reg.get_value("@VT\\SYS\\boot", "tExtra").unwrap().reg_type(),
            RegType::Tab
        );
    }

    #[test]
    fn create_key_is_idempotent() {
        let mut reg = Registry::with_hives();
        reg.create_key("@VT\\DRV\\tty").unwrap();
        reg.set_value("@VT\\DRV\\tty", "n", RegValue::Num(1.0)).unwrap();
        reg.create_key("@VT\\DRV\\tty").unwrap();
        assert!(reg.get_value("@VT\\DRV\\tty", "n").is_ok());
    }

    #[test]
    fn root_hives_cannot_be_deleted() {
        let mut reg = Registry::with_hives();
        let err = reg.delete_key("@VT\\DEV").unwrap_err();
        assert_eq!(err.status, Status::AccessDenied);

        reg.create_key("@VT\\DEV\\tty").unwrap();
        reg.delete_key("@VT\\DEV\\tty").unwrap();
        assert!(reg.enum_keys("@VT\\DEV").unwrap().is_empty());
    }

    #[test]
    fn enumeration_preserves_insertion_order() {
        let mut reg = Registry::with_hives();
        reg.create_key("@VT\\SYS\\b").unwrap();
        reg.create_key("@VT\\SYS\\a").unwrap();
        reg.create_key("@VT\\SYS\\c").unwrap();
        assert_eq!(reg.enum_keys("@VT\\SYS").unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn device_ids_count_up_per_class() {
        let mut reg = Registry::with_hives();
        assert_eq!(reg.alloc_device_id("tty").unwrap(), 0);
        assert_eq!(reg.alloc_device_id("tty").unwrap(), 1);
        assert_eq!(reg.alloc_device_id("disk").unwrap(), 0);
        assert_eq!(reg.alloc_device_id("tty").unwrap(), 2);
    }

    #[test]
    fn wire_round_trip() {
        let original = RegValue::Num(42.5);
        let decoded = RegValue::from_value(&original.to_value()).unwrap();
        assert_eq!(decoded, original);
    }
}
