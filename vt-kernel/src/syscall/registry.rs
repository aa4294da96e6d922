//! Registry syscalls. Ring gating (writes 0–2, reads 0–3) is carried by
//! the table grants.

use std::sync::Arc;

use vt_abi::Value;

use crate::kernel::Kernel;
use crate::registry::RegValue;

use super::{Caller, SysFuture, want_str};

pub fn sys_reg_create_key(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        kernel.registry.lock().create_key(&path)?;
        Ok(Value::Null)
    })
}

pub fn sys_reg_delete_key(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        kernel.registry.lock().delete_key(&path)?;
        Ok(Value::Null)
    })
}

pub fn sys_reg_set_value(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let name = want_str(&args, 1)?;
        let value = RegValue::from_value(args.get(2).unwrap_or(&Value::Null))?;
        kernel.registry.lock().set_value(&path, &name, value)?;
        Ok(Value::Null)
    })
}

pub fn sys_reg_get_value(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let name = want_str(&args, 1)?;
        let registry = kernel.registry.lock();
        let value = registry.get_value(&path, &name)?;
        Ok(value.to_value())
    })
}

pub fn sys_reg_delete_value(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let name = want_str(&args, 1)?;
        kernel.registry.lock().delete_value(&path, &name)?;
        Ok(Value::Null)
    })
}

pub fn sys_reg_enum_keys(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let keys = kernel.registry.lock().enum_keys(&path)?;
        Ok(Value::List(keys.into_iter().map(Value::from).collect()))
    })
}

pub fn sys_reg_enum_values(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let names = kernel.registry.lock().enum_values(&path)?;
        Ok(Value::List(names.into_iter().map(Value::from).collect()))
    })
}

pub fn sys_reg_dump_tree(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        kernel.registry.lock().dump_tree(&path)
    })
}

pub fn sys_reg_alloc_device_id(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let class = want_str(&args, 0)?;
        let id = kernel.registry.lock().alloc_device_id(&class)?;
        Ok(Value::from(id))
    })
}
