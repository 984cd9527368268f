//! The host standard library exposed to guest code through `ccall`.
//!
//! Every function here pops its own arguments off the guest stack, in the
//! order the guest pushed them (argument 0 first), and reports how many
//! values it left behind — informational only, the guest program already
//! knows its own call signature. `fprintf` is deliberately not registered:
//! a guest `ccall "fprintf"` crashes with "undefined C function", matching
//! its half-finished state upstream (it already discarded its varargs).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::VmError;
use crate::host::HostRegistry;
use crate::vm::{FileHandle, Vm};

pub fn register(hosts: &mut HostRegistry) {
    hosts.register("println", host_println);
    hosts.register("print", host_print);
    hosts.register("getline", host_getline);

    hosts.register("fopen", host_fopen);
    hosts.register("fclose", host_fclose);
    hosts.register("fputc", host_fputc);
    hosts.register("fputs", host_fputs);
    hosts.register("fgetc", host_fgetc);
    hosts.register("fread", host_fread);
    hosts.register("ftell", host_ftell);
    hosts.register("fseek", host_fseek);

    hosts.register("malloc", host_malloc);
    hosts.register("free", host_free);
    hosts.register("exit", host_exit);

    hosts.register("min", host_min);
    hosts.register("max", host_max);
    hosts.register("sqrt", host_sqrt);
    hosts.register("sin", host_sin);
    hosts.register("cos", host_cos);
    hosts.register("tan", host_tan);
}

/// Render a `print`-style format string, consuming the matching stack
/// arguments left to right, and return the text produced (not yet written).
fn render_format(vm: &mut Vm) -> String {
    let format = vm.pop_cstring();
    let bytes = format.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] as char {
            '%' => {
                i += 1;
                if i >= bytes.len() {
                    break;
                }
                match bytes[i] as char {
                    's' => out.push_str(&vm.pop_cstring()),
                    'd' => out.push_str(&vm.pop_value().to_string()),
                    'x' => out.push_str(&format!("{:X}", vm.pop_value())),
                    'p' => out.push_str(&format!("0x{:X}", vm.pop_address().0)),
                    'f' => out.push_str(&format!("{:.6}", vm.pop_float_value())),
                    'c' => out.push(vm.pop_value() as u8 as char),
                    other => out.push(other),
                }
            }
            '\\' => {
                i += 1;
                if i >= bytes.len() {
                    break;
                }
                match bytes[i] as char {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    '\\' => out.push('\\'),
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    out
}

fn host_print(vm: &mut Vm) -> Result<u32, VmError> {
    let text = render_format(vm);
    print!("{text}");
    std::io::stdout().flush().ok();
    Ok(0)
}

fn host_println(vm: &mut Vm) -> Result<u32, VmError> {
    let text = render_format(vm);
    println!("{text}");
    Ok(0)
}

fn host_getline(vm: &mut Vm) -> Result<u32, VmError> {
    let buf = vm.pop_value() as usize;
    let length = vm.pop_value() as usize;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    let cap = length.saturating_sub(1);
    let bytes = line.as_bytes();
    let take = bytes.len().min(cap);
    vm.memory_mut().write_bytes(buf, &bytes[..take]);
    vm.memory_mut().write_u8(buf + take, 0);

    if take > 0 && bytes[take - 1] == b'\n' {
        vm.memory_mut().write_u8(buf + take - 1, 0);
        vm.push_value(take as i64 - 1);
    } else {
        vm.push_value(take as i64);
    }
    Ok(1)
}

fn open_with_mode(path: &str, mode: &str) -> std::io::Result<File> {
    let mode = mode.trim_end_matches('b');
    let mut opts = OpenOptions::new();
    match mode {
        "r" => {
            opts.read(true);
        }
        "r+" => {
            opts.read(true).write(true);
        }
        "w" => {
            opts.write(true).create(true).truncate(true);
        }
        "w+" => {
            opts.read(true).write(true).create(true).truncate(true);
        }
        "a" => {
            opts.append(true).create(true);
        }
        "a+" => {
            opts.read(true).append(true).create(true);
        }
        _ => {
            opts.read(true);
        }
    }
    opts.open(path)
}

fn host_fopen(vm: &mut Vm) -> Result<u32, VmError> {
    let filename = vm.pop_cstring();
    let mode = vm.pop_cstring();
    match open_with_mode(&filename, &mode) {
        Ok(file) => {
            vm.files_mut().push(Some(FileHandle::File(file)));
            let handle = vm.files_mut().len() as i64;
            vm.push_value(handle);
        }
        Err(_) => vm.push_value(0),
    }
    Ok(1)
}

fn with_file<R>(vm: &mut Vm, handle: i64, f: impl FnOnce(&mut File) -> std::io::Result<R>) -> Result<R, VmError>
where
    R: Default,
{
    let idx = handle as usize;
    if idx == 0 || idx > vm.files_mut().len() {
        return Ok(R::default());
    }
    match vm.files_mut()[idx - 1].as_mut() {
        Some(FileHandle::File(file)) => Ok(f(file)?),
        None => Ok(R::default()),
    }
}

fn host_fclose(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value() as usize;
    if handle > 0 && handle <= vm.files_mut().len() {
        vm.files_mut()[handle - 1] = None;
    }
    Ok(0)
}

fn host_fputc(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value();
    let byte = vm.pop_value() as u8;
    with_file(vm, handle, |f| f.write_all(&[byte]))?;
    Ok(0)
}

fn host_fputs(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value();
    let text = vm.pop_cstring();
    with_file(vm, handle, |f| f.write_all(text.as_bytes()))?;
    Ok(0)
}

fn host_fgetc(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value();
    let mut byte = [0u8; 1];
    let n = with_file(vm, handle, |f| f.read(&mut byte))?;
    vm.push_value(if n == 1 { byte[0] as i64 } else { -1 });
    Ok(1)
}

fn host_fread(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value();
    let dest = vm.pop_value() as usize;
    let count = vm.pop_value() as usize;
    let mut buf = vec![0u8; count];
    let n = with_file(vm, handle, |f| f.read(&mut buf))?;
    vm.memory_mut().write_bytes(dest, &buf[..n]);
    Ok(0)
}

fn host_ftell(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value();
    let pos = with_file(vm, handle, |f| f.stream_position())?;
    vm.push_value(pos as i64);
    Ok(1)
}

fn host_fseek(vm: &mut Vm) -> Result<u32, VmError> {
    let handle = vm.pop_value();
    let mode = vm.pop_value();
    let offset = vm.pop_value();
    let whence = if mode == 1 { SeekFrom::Start(offset as u64) } else { SeekFrom::End(offset) };
    with_file(vm, handle, |f| f.seek(whence))?;
    Ok(0)
}

fn host_malloc(vm: &mut Vm) -> Result<u32, VmError> {
    let size = vm.pop_value() as u64;
    let addr = vm.heap_mut().malloc(size);
    vm.push_value(addr.0 as i64);
    Ok(1)
}

fn host_free(vm: &mut Vm) -> Result<u32, VmError> {
    let addr = vm.pop_address();
    vm.heap_mut().free(addr)?;
    Ok(0)
}

fn host_exit(_vm: &mut Vm) -> Result<u32, VmError> {
    std::process::exit(0);
}

fn host_min(vm: &mut Vm) -> Result<u32, VmError> {
    let a = vm.pop_value();
    let b = vm.pop_value();
    vm.push_value(a.min(b));
    Ok(1)
}

fn host_max(vm: &mut Vm) -> Result<u32, VmError> {
    let a = vm.pop_value();
    let b = vm.pop_value();
    vm.push_value(a.max(b));
    Ok(1)
}

fn host_sqrt(vm: &mut Vm) -> Result<u32, VmError> {
    let v = vm.pop_float_value();
    vm.push_float_value(v.sqrt());
    Ok(1)
}

fn host_sin(vm: &mut Vm) -> Result<u32, VmError> {
    let v = vm.pop_float_value();
    vm.push_float_value(v.sin());
    Ok(1)
}

fn host_cos(vm: &mut Vm) -> Result<u32, VmError> {
    let v = vm.pop_float_value();
    vm.push_float_value(v.cos());
    Ok(1)
}

fn host_tan(vm: &mut Vm) -> Result<u32, VmError> {
    let v = vm.pop_float_value();
    vm.push_float_value(v.tan());
    Ok(1)
}
