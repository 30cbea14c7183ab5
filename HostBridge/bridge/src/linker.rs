//! Host function registration via Wasmtime linker.
//!
//! Registers every `bridge_host` import with the Wasmtime `Linker`. Values
//! cross as handles into the instance's `HandleTable`; strings and buffers
//! cross as `(ptr, len)` in guest memory.
//!
//! Fallible imports finish through `handle_error`: a `HostError` becomes a
//! pending exception in the guest and the import returns 0. Memory faults
//! in infallible imports trap and abort the guest call.

use std::rc::Rc;

use wasmtime::{Caller, Linker};

use keel_hostapi::{
    ClosureCell, ClosureKind, ErrorValue, GlobalScope, HostError, HostValue, LogLevel, ValueTag,
};
use keel_primitives::ErrorCode;

use crate::closure;
use crate::codec::{decode_bytes, decode_str, encode_str};
use crate::error::{BridgeError, GuestThrow};
use crate::exception::handle_error;
use crate::host_impl::BridgeState;
use crate::memory::{bytes_view, guest_range_mut, numeric_view};
use crate::validation::HOST_MODULE;

type Ctx<'a> = Caller<'a, BridgeState>;

/// Register all `bridge_host` functions with the linker.
pub fn register_host_functions(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    register_object_imports(linker)?;
    register_value_imports(linker)?;
    register_error_imports(linker)?;
    register_closure_imports(linker)?;
    register_env_imports(linker)?;
    register_worker_imports(linker)?;
    Ok(())
}

// ── Handles ──

fn register_object_imports(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HOST_MODULE,
        "object_drop_ref",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<()> {
            let result = caller.data_mut().heap.release(handle).map_err(Into::into);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "object_clone_ref",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<u32> {
            let result = caller.data_mut().heap.clone_ref(handle).map_err(Into::into);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "value_tag",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<u32> {
            let result = caller
                .data()
                .heap
                .get(handle)
                .map(|v| v.tag().as_u32())
                .map_err(Into::into);
            handle_error(&mut caller, result)
        },
    )?;

    Ok(())
}

// ── Strings, bytes, arrays, numbers ──

fn string_new(caller: &mut Ctx<'_>, ptr: u32, len: u32) -> anyhow::Result<u32> {
    let text = decode_str(caller, ptr, len)?;
    Ok(caller.data_mut().heap.alloc(HostValue::String(text)))
}

/// Writes `(ptr, len)` of a fresh UTF-8 copy to `retptr`, or `(0, 0)` if
/// the value is not a string. A dead handle raises.
fn string_get(caller: &mut Ctx<'_>, handle: u32, retptr: u32) -> anyhow::Result<()> {
    let text = caller
        .data()
        .heap
        .get(handle)?
        .as_str()
        .ok()
        .map(str::to_owned);
    let (ptr, len) = match text {
        Some(text) => encode_str(caller, &text)?,
        None => (0, 0),
    };
    let mut view = numeric_view(caller)?;
    view.set_u32(retptr, ptr)?;
    view.set_u32(retptr + 4, len)?;
    Ok(())
}

fn bytes_new(caller: &mut Ctx<'_>, ptr: u32, len: u32) -> anyhow::Result<u32> {
    let bytes = decode_bytes(caller, ptr, len)?;
    Ok(caller.data_mut().heap.alloc(HostValue::Bytes(bytes)))
}

fn bytes_len(caller: &mut Ctx<'_>, handle: u32) -> anyhow::Result<u32> {
    let len = caller.data().heap.get(handle)?.as_bytes()?.len();
    Ok(len as u32)
}

fn bytes_copy_to(caller: &mut Ctx<'_>, handle: u32, dst: u32) -> anyhow::Result<()> {
    let bytes = caller.data().heap.get(handle)?.as_bytes()?.to_vec();
    bytes_view(caller)?.write(dst, &bytes)?;
    Ok(())
}

fn array_len(caller: &mut Ctx<'_>, handle: u32) -> anyhow::Result<u32> {
    let len = caller.data().heap.get(handle)?.as_array()?.len();
    Ok(len as u32)
}

fn array_get(caller: &mut Ctx<'_>, handle: u32, index: u32) -> anyhow::Result<u32> {
    let item = caller
        .data()
        .heap
        .get(handle)?
        .as_array()?
        .get(index as usize)
        .cloned()
        .unwrap_or(HostValue::Undefined);
    Ok(caller.data_mut().heap.alloc(item))
}

fn number_get(caller: &mut Ctx<'_>, handle: u32, retptr: u32) -> anyhow::Result<u32> {
    let number = match caller.data().heap.get(handle)? {
        HostValue::Number(n) => *n,
        _ => return Ok(0),
    };
    numeric_view(caller)?.set_f64(retptr, number)?;
    Ok(1)
}

fn register_value_imports(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HOST_MODULE,
        "string_new",
        |mut caller: Ctx<'_>, ptr: u32, len: u32| -> anyhow::Result<u32> {
            let result = string_new(&mut caller, ptr, len);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "string_get",
        |mut caller: Ctx<'_>, handle: u32, retptr: u32| -> anyhow::Result<()> {
            let result = string_get(&mut caller, handle, retptr);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "bytes_new",
        |mut caller: Ctx<'_>, ptr: u32, len: u32| -> anyhow::Result<u32> {
            let result = bytes_new(&mut caller, ptr, len);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "bytes_len",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<u32> {
            let result = bytes_len(&mut caller, handle);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "bytes_copy_to",
        |mut caller: Ctx<'_>, handle: u32, dst: u32| -> anyhow::Result<()> {
            let result = bytes_copy_to(&mut caller, handle, dst);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "array_len",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<u32> {
            let result = array_len(&mut caller, handle);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "array_get",
        |mut caller: Ctx<'_>, handle: u32, index: u32| -> anyhow::Result<u32> {
            let result = array_get(&mut caller, handle, index);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(HOST_MODULE, "number_new", |mut caller: Ctx<'_>, value: f64| -> u32 {
        caller.data_mut().heap.alloc(HostValue::Number(value))
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "number_get",
        |mut caller: Ctx<'_>, handle: u32, retptr: u32| -> anyhow::Result<u32> {
            let result = number_get(&mut caller, handle, retptr);
            handle_error(&mut caller, result)
        },
    )?;

    Ok(())
}

// ── Errors ──

fn error_new(caller: &mut Ctx<'_>, code: i32, ptr: u32, len: u32) -> anyhow::Result<u32> {
    let message = decode_str(caller, ptr, len)?;
    let code = ErrorCode::from_i32(code).unwrap_or(ErrorCode::Error);
    Ok(caller
        .data_mut()
        .heap
        .alloc(HostValue::Error(ErrorValue::new(code, message))))
}

fn register_error_imports(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HOST_MODULE,
        "error_new",
        |mut caller: Ctx<'_>, code: i32, ptr: u32, len: u32| -> anyhow::Result<u32> {
            let result = error_new(&mut caller, code, ptr, len);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "throw",
        |mut caller: Ctx<'_>, ptr: u32, len: u32| -> anyhow::Result<()> {
            let message = decode_bytes(&mut caller, ptr, len)?;
            Err(GuestThrow(String::from_utf8_lossy(&message).into_owned()).into())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "rethrow",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<()> {
            let value = caller.data_mut().heap.take(handle)?;
            let raised = match value {
                HostValue::Error(err) => err,
                other => ErrorValue::new(ErrorCode::Error, format!("{other:?}")),
            };
            Err(HostError::Raised(raised).into())
        },
    )?;

    Ok(())
}

// ── Closures and calls ──

fn closure_new(
    caller: &mut Ctx<'_>,
    a: u32,
    b: u32,
    dtor: u32,
    invoke: u32,
    kind: u32,
) -> anyhow::Result<u32> {
    let kind = ClosureKind::from_u32(kind)
        .ok_or_else(|| HostError::InvalidEncoding(format!("unknown closure kind {kind}")))?;
    let state = caller.data_mut();
    let cell = ClosureCell::new(a, b, dtor, invoke, kind, state.reclaim.clone());
    Ok(state.heap.alloc(HostValue::Closure(Rc::new(cell))))
}

fn cb_drop(caller: &mut Ctx<'_>, handle: u32) -> u32 {
    match caller.data_mut().heap.take(handle) {
        Ok(HostValue::Closure(cell)) => u32::from(cell.release()),
        Ok(other) => {
            tracing::error!(handle, tag = %other.tag(), "cb_drop on a value that is not a closure");
            0
        }
        Err(_) => {
            tracing::error!(handle, "cb_drop on a handle that is not live");
            0
        }
    }
}

fn call(caller: &mut Ctx<'_>, callee: u32, arg: u32) -> anyhow::Result<u32> {
    let callee = caller.data().heap.get(callee)?.clone();
    let arg = caller.data_mut().heap.take(arg)?;
    let ret = closure::call_value(caller, &callee, arg)?;
    Ok(caller.data_mut().heap.alloc(ret))
}

fn register_closure_imports(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HOST_MODULE,
        "closure_new",
        |mut caller: Ctx<'_>,
         a: u32,
         b: u32,
         dtor: u32,
         invoke: u32,
         kind: u32|
         -> anyhow::Result<u32> {
            let result = closure_new(&mut caller, a, b, dtor, invoke, kind);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(HOST_MODULE, "cb_drop", |mut caller: Ctx<'_>, handle: u32| -> u32 {
        cb_drop(&mut caller, handle)
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "call",
        |mut caller: Ctx<'_>, callee: u32, arg: u32| -> anyhow::Result<u32> {
            let result = call(&mut caller, callee, arg);
            handle_error(&mut caller, result)
        },
    )?;

    Ok(())
}

// ── Environment: logging, randomness, microtasks, globals ──

fn log(caller: &mut Ctx<'_>, level: u32, ptr: u32, len: u32) -> anyhow::Result<()> {
    if !caller.data().enable_guest_logs {
        return Ok(());
    }
    let bytes = decode_bytes(caller, ptr, len)?;
    let message = String::from_utf8_lossy(&bytes);
    caller
        .data_mut()
        .record_log(LogLevel::from_u32(level), &message);
    Ok(())
}

fn random_fill(caller: &mut Ctx<'_>, ptr: u32, len: u32) -> anyhow::Result<()> {
    let (dst, state) = guest_range_mut(caller, ptr, len)?;
    state.random.fill(dst)?;
    Ok(())
}

fn queue_microtask(caller: &mut Ctx<'_>, handle: u32) -> anyhow::Result<()> {
    let callee = caller.data().heap.get(handle)?.clone();
    if !matches!(callee, HostValue::Closure(_) | HostValue::Function(_)) {
        return Err(HostError::type_mismatch(ValueTag::Function, callee.tag()).into());
    }
    caller.data_mut().microtasks.push_back(callee);
    Ok(())
}

fn global(caller: &mut Ctx<'_>, scope: u32) -> u32 {
    let value = GlobalScope::from_u32(scope).and_then(|s| caller.data().globals.get(s).cloned());
    match value {
        Some(value) => caller.data_mut().heap.alloc(value),
        None => 0,
    }
}

fn register_env_imports(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HOST_MODULE,
        "log",
        |mut caller: Ctx<'_>, level: u32, ptr: u32, len: u32| -> anyhow::Result<()> {
            log(&mut caller, level, ptr, len)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "random_fill",
        |mut caller: Ctx<'_>, ptr: u32, len: u32| -> anyhow::Result<()> {
            let result = random_fill(&mut caller, ptr, len);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "queue_microtask",
        |mut caller: Ctx<'_>, handle: u32| -> anyhow::Result<()> {
            let result = queue_microtask(&mut caller, handle);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(HOST_MODULE, "global", |mut caller: Ctx<'_>, scope: u32| -> u32 {
        global(&mut caller, scope)
    })?;

    Ok(())
}

// ── Workers ──

fn worker_spawn(caller: &mut Ctx<'_>, ptr: u32, len: u32) -> anyhow::Result<u32> {
    let name = decode_str(caller, ptr, len)?;
    let task = caller.data().dispatcher.spawn(&name)?;
    Ok(caller.data_mut().add_worker(task))
}

fn worker_set_onmessage(caller: &mut Ctx<'_>, id: u32, handle: u32) -> anyhow::Result<()> {
    let callee = caller.data().heap.get(handle)?.clone();
    if !matches!(callee, HostValue::Closure(_) | HostValue::Function(_)) {
        return Err(HostError::type_mismatch(ValueTag::Function, callee.tag()).into());
    }
    let worker = caller
        .data_mut()
        .workers
        .get_mut(&id)
        .ok_or(HostError::InvalidHandle(id))?;
    worker.onmessage = Some(callee);
    Ok(())
}

fn worker_post(caller: &mut Ctx<'_>, id: u32, ptr: u32, len: u32) -> anyhow::Result<()> {
    let payload = decode_bytes(caller, ptr, len)?;
    let worker = caller
        .data()
        .workers
        .get(&id)
        .ok_or(HostError::InvalidHandle(id))?;
    worker.task.send(payload)?;
    Ok(())
}

fn register_worker_imports(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HOST_MODULE,
        "worker_spawn",
        |mut caller: Ctx<'_>, ptr: u32, len: u32| -> anyhow::Result<u32> {
            let result = worker_spawn(&mut caller, ptr, len);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "worker_set_onmessage",
        |mut caller: Ctx<'_>, id: u32, handle: u32| -> anyhow::Result<()> {
            let result = worker_set_onmessage(&mut caller, id, handle);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "worker_post",
        |mut caller: Ctx<'_>, id: u32, ptr: u32, len: u32| -> anyhow::Result<()> {
            let result = worker_post(&mut caller, id, ptr, len);
            handle_error(&mut caller, result)
        },
    )?;

    linker.func_wrap(HOST_MODULE, "worker_close", |mut caller: Ctx<'_>, id: u32| {
        if let Some(worker) = caller.data_mut().workers.remove(&id) {
            worker.task.close();
        }
    })?;

    Ok(())
}
