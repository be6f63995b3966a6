/*!
 * C ABI for language bindings
 *
 * Library for reading large files concurrently into a given host memory
 * buffer. NOT THREAD SAFE - the caller must not send requests and drain
 * responses in parallel.
 *
 * Response codes cross the boundary as `i32` values of `ResponseCode`;
 * panics never do.
 */

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::credentials::Credentials;
use crate::destination::DstBuffer;
use crate::logging::init_logging;
use crate::response_code::ResponseCode;
use crate::streamer::{FileRequest, Streamer};

fn code_to_i32(code: ResponseCode) -> i32 {
    code as i32
}

unsafe fn optional_string(value: *const c_char) -> Option<String> {
    if value.is_null() {
        return None;
    }
    Some(CStr::from_ptr(value).to_string_lossy().into_owned())
}

/// Create a streamer with its worker pool. Returns `Success` and stores
/// the handle in `streamer`, or an error code.
///
/// # Safety
///
/// `streamer` must be a valid pointer to writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn runai_start(streamer: *mut *mut c_void) -> i32 {
    init_logging();

    if streamer.is_null() {
        return code_to_i32(ResponseCode::InvalidParameterError);
    }

    let result = catch_unwind(|| Streamer::new());
    match result {
        Ok(Ok(engine)) => {
            *streamer = Box::into_raw(Box::new(engine)) as *mut c_void;
            code_to_i32(ResponseCode::Success)
        }
        Ok(Err(e)) => code_to_i32(e.code()),
        Err(_) => code_to_i32(ResponseCode::UnknownError),
    }
}

/// Destroy a streamer, stopping in-flight work.
///
/// # Safety
///
/// `streamer` must be a handle returned by `runai_start`, not used after
/// this call.
#[no_mangle]
pub unsafe extern "C" fn runai_end(streamer: *mut c_void) {
    if streamer.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        drop(Box::from_raw(streamer as *mut Streamer));
    }));
}

/// Start one asynchronous aggregate read.
///
/// `paths`, `file_offsets`, `bytesizes` and `num_sizes` are arrays of
/// `num_files` entries; `internal_sizes[i]` lists the `num_sizes[i]`
/// sub-range sizes of file `i`. `dsts[0]` is the base of one contiguous
/// destination buffer receiving all files in path order. The optional
/// credential strings may be null.
///
/// # Safety
///
/// All array pointers must be valid for `num_files` entries and the
/// destination buffer must stay valid until the request's events have all
/// been delivered (or the streamer is destroyed).
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn runai_request(
    streamer: *mut c_void,
    num_files: u32,
    paths: *const *const c_char,
    file_offsets: *const u64,
    bytesizes: *const u64,
    dsts: *const *mut c_void,
    num_sizes: *const u32,
    internal_sizes: *const *const u64,
    key: *const c_char,
    secret: *const c_char,
    token: *const c_char,
    region: *const c_char,
    endpoint: *const c_char,
) -> i32 {
    if streamer.is_null()
        || num_files == 0
        || paths.is_null()
        || file_offsets.is_null()
        || bytesizes.is_null()
        || dsts.is_null()
        || num_sizes.is_null()
        || internal_sizes.is_null()
    {
        return code_to_i32(ResponseCode::InvalidParameterError);
    }

    let engine = &mut *(streamer as *mut Streamer);
    let count = num_files as usize;

    let mut files = Vec::with_capacity(count);
    let mut total_bytes: u64 = 0;
    for i in 0..count {
        let path_ptr = *paths.add(i);
        if path_ptr.is_null() {
            return code_to_i32(ResponseCode::InvalidParameterError);
        }
        let path = CStr::from_ptr(path_ptr).to_string_lossy().into_owned();

        let bytesize = *bytesizes.add(i);
        total_bytes = match total_bytes.checked_add(bytesize) {
            Some(total) => total,
            None => return code_to_i32(ResponseCode::InvalidParameterError),
        };

        let sizes_count = *num_sizes.add(i) as usize;
        let sizes_ptr = *internal_sizes.add(i);
        let sub_sizes = if sizes_count == 0 {
            Vec::new()
        } else if sizes_ptr.is_null() {
            return code_to_i32(ResponseCode::InvalidParameterError);
        } else {
            std::slice::from_raw_parts(sizes_ptr, sizes_count).to_vec()
        };

        files.push(FileRequest {
            path,
            offset: *file_offsets.add(i),
            bytesize,
            sub_sizes,
        });
    }

    // a single contiguous buffer receives all files
    let dst_ptr = *dsts;
    if dst_ptr.is_null() {
        return code_to_i32(ResponseCode::InvalidParameterError);
    }
    let dst = DstBuffer::new(dst_ptr as *mut u8, total_bytes as usize);

    let credentials = Credentials {
        access_key_id: optional_string(key),
        secret_access_key: optional_string(secret),
        session_token: optional_string(token),
        region: optional_string(region),
        endpoint: optional_string(endpoint),
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        engine.request(&files, dst, credentials)
    }));
    match result {
        Ok(Ok(())) => code_to_i32(ResponseCode::Success),
        Ok(Err(e)) => code_to_i32(e.code()),
        Err(_) => code_to_i32(ResponseCode::UnknownError),
    }
}

/// Pop one completion event. Returns the sub-request's code and fills
/// `file_index` and `index`; `FinishedError` after the last event.
///
/// # Safety
///
/// `streamer` must be a live handle; the out parameters must be valid
/// writable pointers.
#[no_mangle]
pub unsafe extern "C" fn runai_response(
    streamer: *mut c_void,
    file_index: *mut u32,
    index: *mut u32,
) -> i32 {
    if streamer.is_null() || file_index.is_null() || index.is_null() {
        return code_to_i32(ResponseCode::InvalidParameterError);
    }

    let engine = &*(streamer as *mut Streamer);
    let result = catch_unwind(AssertUnwindSafe(|| engine.response()));
    match result {
        Ok(response) => {
            *file_index = response.file_index;
            *index = response.index;
            code_to_i32(response.ret)
        }
        Err(_) => code_to_i32(ResponseCode::UnknownError),
    }
}

/// Human-readable description of a response code.
#[no_mangle]
pub extern "C" fn runai_response_str(response_code: i32) -> *const c_char {
    let text: &'static [u8] = match ResponseCode::from_i32(response_code) {
        Some(ResponseCode::Success) => b"Request sent successfully\0",
        Some(ResponseCode::FinishedError) => b"Finished all responses\0",
        Some(ResponseCode::FileAccessError) => b"File access error\0",
        Some(ResponseCode::EofError) => b"End of file reached\0",
        Some(ResponseCode::S3NotSupported) => b"S3 not supported\0",
        Some(ResponseCode::GlibcPrerequisite) => b"GLIBC version should be at least 2.29\0",
        Some(ResponseCode::InsufficientFdLimit) => {
            b"Increase process fd limit or decrease the concurrency level. Recommended value for the streamer alone is the concurrency multiplied by 64, in addition to your application fd usage\0"
        }
        Some(ResponseCode::InvalidParameterError) => b"Invalid request parameters\0",
        Some(ResponseCode::EmptyRequestError) => b"Empty request parameters\0",
        Some(ResponseCode::BusyError) => b"Streamer is handling previous request\0",
        Some(ResponseCode::UnknownError) => b"Unknown Error\0",
        None => b"Invalid response code\0",
    };
    text.as_ptr() as *const c_char
}
