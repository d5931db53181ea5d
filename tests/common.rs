//! Shared helpers for assembling binary modules in tests.
//!
//! Little-endian header plus hand-encoded sections; just enough of an
//! encoder to express the fixtures the suites need.

#![allow(dead_code)]

pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;

pub const END: u8 = 0x0b;

pub fn unsigned_leb(value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut value = value;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            return out;
        }
    }
}

pub fn signed_leb(value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut value = value;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        out.push(if done { byte } else { byte | 0x80 });
        if done {
            return out;
        }
    }
}

pub fn section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(unsigned_leb(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// Magic, version, and the given sections.
pub fn module(sections: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
    for section in sections {
        out.extend_from_slice(section);
    }
    out
}

pub fn func_type(params: &[u8], results: &[u8]) -> Vec<u8> {
    let mut out = vec![0x60];
    out.extend(unsigned_leb(params.len() as u64));
    out.extend_from_slice(params);
    out.extend(unsigned_leb(results.len() as u64));
    out.extend_from_slice(results);
    out
}

pub fn type_section(types: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(types.len() as u64);
    for entry in types {
        payload.extend_from_slice(entry);
    }
    section(1, &payload)
}

pub fn import_entry(module_name: &str, name: &str, desc: &[u8]) -> Vec<u8> {
    let mut out = unsigned_leb(module_name.len() as u64);
    out.extend_from_slice(module_name.as_bytes());
    out.extend(unsigned_leb(name.len() as u64));
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(desc);
    out
}

pub fn import_func_desc(type_index: u32) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend(unsigned_leb(type_index as u64));
    out
}

pub fn import_section(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(entries.len() as u64);
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    section(2, &payload)
}

pub fn function_section(type_indices: &[u32]) -> Vec<u8> {
    let mut payload = unsigned_leb(type_indices.len() as u64);
    for &type_index in type_indices {
        payload.extend(unsigned_leb(type_index as u64));
    }
    section(3, &payload)
}

pub fn limits(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut out = Vec::new();
    match max {
        None => {
            out.push(0x00);
            out.extend(unsigned_leb(min as u64));
        }
        Some(max) => {
            out.push(0x01);
            out.extend(unsigned_leb(min as u64));
            out.extend(unsigned_leb(max as u64));
        }
    }
    out
}

pub fn table_section(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut payload = unsigned_leb(1);
    payload.push(0x70);
    payload.extend(limits(min, max));
    section(4, &payload)
}

pub fn memory_section(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut payload = unsigned_leb(1);
    payload.extend(limits(min, max));
    section(5, &payload)
}

pub fn global_entry(value_type: u8, is_mutable: bool, init: &[u8]) -> Vec<u8> {
    let mut out = vec![value_type, is_mutable as u8];
    out.extend_from_slice(init);
    out
}

pub fn global_section(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(entries.len() as u64);
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    section(6, &payload)
}

/// `i32.const <value>, end` -- the most common initialiser.
pub fn i32_const_expr(value: i32) -> Vec<u8> {
    let mut out = vec![0x41];
    out.extend(signed_leb(value as i64));
    out.push(END);
    out
}

pub fn export_entry(name: &str, kind: u8, index: u32) -> Vec<u8> {
    let mut out = unsigned_leb(name.len() as u64);
    out.extend_from_slice(name.as_bytes());
    out.push(kind);
    out.extend(unsigned_leb(index as u64));
    out
}

pub fn export_func(name: &str, index: u32) -> Vec<u8> {
    export_entry(name, 0x00, index)
}

pub fn export_section(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(entries.len() as u64);
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    section(7, &payload)
}

pub fn start_section(func_idx: u32) -> Vec<u8> {
    section(8, &unsigned_leb(func_idx as u64))
}

pub fn element_entry(offset_expr: &[u8], func_indices: &[u32]) -> Vec<u8> {
    let mut out = unsigned_leb(0);
    out.extend_from_slice(offset_expr);
    out.extend(unsigned_leb(func_indices.len() as u64));
    for &func_idx in func_indices {
        out.extend(unsigned_leb(func_idx as u64));
    }
    out
}

pub fn element_section(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(entries.len() as u64);
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    section(9, &payload)
}

/// A code-section body: expanded local declarations, the instruction bytes,
/// and the closing `end`.
pub fn func_body(local_groups: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut body = unsigned_leb(local_groups.len() as u64);
    for &(repeat, value_type) in local_groups {
        body.extend(unsigned_leb(repeat as u64));
        body.push(value_type);
    }
    body.extend_from_slice(code);
    body.push(END);

    let mut out = unsigned_leb(body.len() as u64);
    out.extend_from_slice(&body);
    out
}

pub fn code_section(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(bodies.len() as u64);
    for body in bodies {
        payload.extend_from_slice(body);
    }
    section(10, &payload)
}

pub fn data_entry(offset_expr: &[u8], bytes: &[u8]) -> Vec<u8> {
    let mut out = unsigned_leb(0);
    out.extend_from_slice(offset_expr);
    out.extend(unsigned_leb(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out
}

pub fn data_section(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = unsigned_leb(entries.len() as u64);
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    section(11, &payload)
}
