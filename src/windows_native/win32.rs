use std::ffi::c_void;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_BAD_NETPATH,
    ERROR_BAD_NET_NAME, ERROR_DIRECTORY, ERROR_DIR_NOT_EMPTY,
    ERROR_FILENAME_EXCED_RANGE, ERROR_FILE_EXISTS, ERROR_FILE_NOT_FOUND, ERROR_HANDLE_EOF,
    ERROR_INSUFFICIENT_BUFFER, ERROR_LOCK_VIOLATION, ERROR_PATH_NOT_FOUND,
    ERROR_PRIVILEGE_NOT_HELD, ERROR_SHARING_VIOLATION, FILETIME, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Security::Authorization::{SetNamedSecurityInfoW, SE_FILE_OBJECT};
use windows_sys::Win32::Security::{GetFileSecurityW, LookupAccountSidW, SID_NAME_USE};
use windows_sys::Win32::Storage::FileSystem::{
    CopyFileW, CreateDirectoryW, DeleteFileW, FindClose, FindFirstStreamW, FindNextStreamW,
    FindStreamInfoStandard, GetFileAttributesExW, GetFileExInfoStandard, MoveFileExW,
    RemoveDirectoryW, WIN32_FILE_ATTRIBUTE_DATA, WIN32_FIND_STREAM_DATA,
};

use crate::common::error::{FsError, Operation, PathProblem};
use crate::common::path::FilesystemPath;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

pub fn map_win32_error(code: u32, operation: Operation, path: &FilesystemPath) -> FsError {
    let display = path.to_string();
    match code {
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND | ERROR_BAD_NETPATH | ERROR_BAD_NET_NAME => {
            FsError::PathNotFound { path: display }
        }
        ERROR_FILE_EXISTS | ERROR_ALREADY_EXISTS => FsError::AlreadyExists { path: display },
        ERROR_ACCESS_DENIED if operation.changes_permissions() => FsError::Permission { path: display },
        ERROR_PRIVILEGE_NOT_HELD => FsError::Permission { path: display },
        ERROR_ACCESS_DENIED | ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION => {
            FsError::AccessDenied { path: display }
        }
        ERROR_DIR_NOT_EMPTY => FsError::DirectoryNotEmpty { path: display },
        ERROR_DIRECTORY => FsError::NotADirectory { path: display },
        ERROR_FILENAME_EXCED_RANGE => FsError::invalid_path(display, PathProblem::TooLong),
        _ => FsError::NativeOperation {
            operation,
            path: display,
            source: io::Error::from_raw_os_error(code as i32),
        },
    }
}

pub fn last_error() -> u32 {
    unsafe { GetLastError() }
}

/// NUL-terminated UTF-16.
pub fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn wide_until_nul(buf: &[u16]) -> &[u16] {
    let nul = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    &buf[..nul]
}

pub fn filetime_to_system_time(ft: &FILETIME) -> Option<SystemTime> {
    let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
    if ticks == 0 {
        return None;
    }
    let since_1601 = Duration::from_nanos(ticks.saturating_mul(100));
    let offset = Duration::from_secs(FILETIME_UNIX_OFFSET_SECS);
    since_1601.checked_sub(offset).map(|since_epoch| UNIX_EPOCH + since_epoch)
}

pub struct AttributeData {
    pub attributes: u32,
    pub len: u64,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

pub fn get_attribute_data(name: &str) -> Result<AttributeData, u32> {
    let wide = to_wide(name);
    let mut data: WIN32_FILE_ATTRIBUTE_DATA = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        GetFileAttributesExW(
            wide.as_ptr(),
            GetFileExInfoStandard,
            &mut data as *mut WIN32_FILE_ATTRIBUTE_DATA as *mut c_void,
        )
    };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(AttributeData {
        attributes: data.dwFileAttributes,
        len: ((data.nFileSizeHigh as u64) << 32) | data.nFileSizeLow as u64,
        created: filetime_to_system_time(&data.ftCreationTime),
        accessed: filetime_to_system_time(&data.ftLastAccessTime),
        modified: filetime_to_system_time(&data.ftLastWriteTime),
    })
}

pub fn create_directory(name: &str) -> Result<(), u32> {
    let wide = to_wide(name);
    let ok = unsafe { CreateDirectoryW(wide.as_ptr(), std::ptr::null()) };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn delete_file(name: &str) -> Result<(), u32> {
    let wide = to_wide(name);
    let ok = unsafe { DeleteFileW(wide.as_ptr()) };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn remove_directory(name: &str) -> Result<(), u32> {
    let wide = to_wide(name);
    let ok = unsafe { RemoveDirectoryW(wide.as_ptr()) };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(())
}

/// Never falls back to copy-and-delete; a move across volumes fails with
/// `ERROR_NOT_SAME_DEVICE`.
pub fn move_file(from: &str, to: &str, flags: u32) -> Result<(), u32> {
    let from_wide = to_wide(from);
    let to_wide = to_wide(to);
    let ok = unsafe { MoveFileExW(from_wide.as_ptr(), to_wide.as_ptr(), flags) };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn copy_file(from: &str, to: &str, fail_if_exists: bool) -> Result<(), u32> {
    let from_wide = to_wide(from);
    let to_wide = to_wide(to);
    let ok = unsafe { CopyFileW(from_wide.as_ptr(), to_wide.as_ptr(), fail_if_exists as i32) };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(())
}

/// Self-relative descriptor bytes for the requested information bits.
pub fn get_file_security(name: &str, information: u32) -> Result<Vec<u8>, u32> {
    let wide = to_wide(name);
    let mut needed = 0u32;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let ok = unsafe {
            GetFileSecurityW(
                wide.as_ptr(),
                information,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut needed,
            )
        };
        if ok != 0 {
            return Ok(buf);
        }
        let err = last_error();
        if err != ERROR_INSUFFICIENT_BUFFER || (needed as usize) <= buf.len() {
            return Err(err);
        }
        buf.resize(needed as usize, 0);
    }
}

/// Applies descriptor parts in place. Null pointers leave that part alone
/// unless its bit is in `information`.
pub fn set_named_security(
    name: &str,
    information: u32,
    owner: *const u8,
    group: *const u8,
    dacl: *const u8,
    sacl: *const u8,
) -> Result<(), u32> {
    let mut wide = to_wide(name);
    let rc = unsafe {
        SetNamedSecurityInfoW(
            wide.as_mut_ptr() as _,
            SE_FILE_OBJECT,
            information,
            owner as *mut c_void as _,
            group as *mut c_void as _,
            dacl as _,
            sacl as _,
        )
    };
    if rc != 0 {
        return Err(rc);
    }
    Ok(())
}

/// `DOMAIN\name`, or just `name` for accounts without a domain.
pub fn lookup_account_sid(sid: &[u8]) -> Option<String> {
    let mut name = vec![0u16; 256];
    let mut domain = vec![0u16; 256];
    loop {
        let mut name_len = name.len() as u32;
        let mut domain_len = domain.len() as u32;
        let mut sid_use: SID_NAME_USE = 0;
        let ok = unsafe {
            LookupAccountSidW(
                std::ptr::null(),
                sid.as_ptr() as *mut c_void as _,
                name.as_mut_ptr(),
                &mut name_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut sid_use,
            )
        };
        if ok != 0 {
            let account = String::from_utf16_lossy(wide_until_nul(&name));
            let domain = String::from_utf16_lossy(wide_until_nul(&domain));
            if domain.is_empty() {
                return Some(account);
            }
            return Some(format!("{domain}\\{account}"));
        }
        if last_error() != ERROR_INSUFFICIENT_BUFFER {
            return None;
        }
        name.resize((name_len as usize).max(name.len() + 1), 0);
        domain.resize((domain_len as usize).max(domain.len() + 1), 0);
    }
}

/// Named alternate data streams as `(name, size)`. The unnamed data stream
/// is not reported.
pub fn find_streams(name: &str) -> Result<Vec<(String, u64)>, u32> {
    let wide = to_wide(name);
    let mut data: WIN32_FIND_STREAM_DATA = unsafe { std::mem::zeroed() };
    let handle = unsafe {
        FindFirstStreamW(
            wide.as_ptr(),
            FindStreamInfoStandard,
            &mut data as *mut WIN32_FIND_STREAM_DATA as *mut c_void,
            0,
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        let err = last_error();
        if err == ERROR_HANDLE_EOF {
            return Ok(Vec::new());
        }
        return Err(err);
    }

    let mut streams = Vec::new();
    loop {
        // Raw names look like ":name:$DATA".
        let raw = String::from_utf16_lossy(wide_until_nul(&data.cStreamName));
        if let Some(stream) = raw
            .strip_prefix(':')
            .and_then(|rest| rest.strip_suffix(":$DATA"))
        {
            if !stream.is_empty() {
                streams.push((stream.to_string(), data.StreamSize as u64));
            }
        }
        let more = unsafe {
            FindNextStreamW(handle, &mut data as *mut WIN32_FIND_STREAM_DATA as *mut c_void)
        };
        if more == 0 {
            let err = last_error();
            unsafe {
                FindClose(handle);
            }
            if err == ERROR_HANDLE_EOF {
                return Ok(streams);
            }
            return Err(err);
        }
    }
}
