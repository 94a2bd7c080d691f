//! FFI bindings for the NSG index
//!
//! This module provides a C-compatible interface over `nsg_core::NsgIndex`.
//! All functions are panic-safe and use thread-local error reporting.
//!
//! # Safety Guarantees
//!
//! - No panic may cross the FFI boundary (enforced by `ffi_guard`)
//! - Strict UTF-8 validation for all string inputs
//! - Null pointer checks on all pointer arguments
//! - ABI stability via `#[repr(C)]` and `extern "C"`
//!
//! # Error Handling
//!
//! Errors are reported through:
//! - Return values: NULL for `nsg_new`, `0` for search, `-1` for the
//!   remaining operations
//! - Thread-local error message: `nsg_last_error_message()`
//!
//! # Thread Safety
//!
//! - Exclusive access: `nsg_build`, `nsg_optimize_graph`, `nsg_load`
//! - Shared access: `nsg_search`, `nsg_search_opt`, `nsg_save` and the
//!   introspection calls may run concurrently
//! - Each thread has its own error message storage

use libc::{c_char, c_float, c_int, size_t};
use nsg_core::{BuildParams, Metric, SearchResult, VectorStore};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::ptr;
use std::slice;

/// Internal state holder (not exposed to C)
struct NsgIndexState {
    inner: nsg_core::NsgIndex,
}

/// Opaque handle to an NSG index (C-compatible)
///
/// C code only sees pointers to this type. The real data lives in
/// `NsgIndexState`.
#[repr(C)]
pub struct NsgIndex {
    _private: [u8; 0],
}

thread_local! {
    /// Last error message of the current thread.
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message for the current thread
///
/// Interior NULs are replaced with the escaped sequence "\\0" so that error
/// reporting itself cannot fail.
fn set_last_error(err: impl std::fmt::Display) {
    LAST_ERROR.with(|cell| {
        let safe_msg = err.to_string().replace('\0', "\\0");
        let c_str = CString::new(safe_msg).unwrap_or_default();
        *cell.borrow_mut() = Some(c_str);
    });
}

/// Clear the last error message for the current thread
fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Panic barrier that catches all panics at the FFI boundary
///
/// Converts a panic into an error message and returns `None`, so callers
/// can fall back to their sentinel value.
fn ffi_guard<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R,
{
    // The operation is abandoned on panic, never resumed.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(e) => {
            let msg = if let Some(s) = e.downcast_ref::<&str>() {
                format!("Panic: {s}")
            } else if let Some(s) = e.downcast_ref::<String>() {
                format!("Panic: {s}")
            } else {
                "Unknown panic".to_string()
            };
            set_last_error(msg);
            None
        }
    }
}

/// Reports the outcome of a fallible operation as `0` / `-1`.
fn status(result: nsg_core::Result<()>) -> c_int {
    match result {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(e);
            -1
        }
    }
}

/// Borrows a C path argument as UTF-8.
///
/// # Safety
///
/// `path` must be NULL or a valid NUL-terminated string.
unsafe fn path_arg<'a>(path: *const c_char) -> Result<&'a str, &'static str> {
    if path.is_null() {
        return Err("Path cannot be NULL");
    }
    // SAFETY: Caller guarantees path is a valid C string
    let c_path = unsafe { CStr::from_ptr(path) };
    // Strict UTF-8: no lossy conversion
    c_path.to_str().map_err(|_| "Path must be valid UTF-8")
}

/// # Safety
///
/// `ptr` must be NULL or a pointer returned by `nsg_new`.
unsafe fn index_ref<'a>(ptr: *const NsgIndex) -> Option<&'a nsg_core::NsgIndex> {
    // SAFETY: Caller guarantees ptr is NULL or valid
    unsafe { ptr.cast::<NsgIndexState>().as_ref() }.map(|s| &s.inner)
}

/// # Safety
///
/// `ptr` must be NULL or a pointer returned by `nsg_new`, with no other
/// access during the borrow.
unsafe fn index_mut<'a>(ptr: *mut NsgIndex) -> Option<&'a mut nsg_core::NsgIndex> {
    // SAFETY: Caller guarantees ptr is NULL or valid and exclusively held
    unsafe { ptr.cast::<NsgIndexState>().as_mut() }.map(|s| &mut s.inner)
}

//
// === LIFECYCLE MANAGEMENT ===
//

/// Create an index over a copy of `n` row-major vectors of `dims` floats
///
/// # Arguments
///
/// - `data`: Pointer to `n * dims` floats (must not be NULL)
/// - `n`: Number of vectors (must be > 0)
/// - `dims`: Dimensions per vector (must be > 0)
/// - `metric`: 0 = L2, 1 = inner product, 2 = fast L2
///
/// # Returns
///
/// - Non-NULL pointer on success
/// - NULL on failure (check `nsg_last_error_message()`)
///
/// # Example (C)
///
/// ```c
/// NsgIndex* index = nsg_new(vectors, 10000, 128, 0);
/// if (index == NULL) {
///     fprintf(stderr, "Error: %s\n", nsg_last_error_message());
///     exit(1);
/// }
/// ```
///
/// # Safety
///
/// - `data` must point to `n * dims` valid floats
/// - Caller must free the returned pointer with `nsg_free()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_new(data: *const c_float, n: size_t, dims: size_t, metric: u32) -> *mut NsgIndex {
    ffi_guard(|| {
        if data.is_null() {
            set_last_error("Data pointer cannot be NULL");
            return ptr::null_mut();
        }
        if n == 0 || dims == 0 {
            set_last_error("Number of vectors and dimensions must be > 0");
            return ptr::null_mut();
        }
        let Some(metric) = Metric::from_code(metric) else {
            set_last_error(format!("Unknown metric code {metric}"));
            return ptr::null_mut();
        };
        let Some(len) = n.checked_mul(dims) else {
            set_last_error("Vector buffer size overflows");
            return ptr::null_mut();
        };

        // SAFETY: Caller guarantees data points to n * dims valid floats
        let values = unsafe { slice::from_raw_parts(data, len) }.to_vec();

        match VectorStore::from_flat(values, dims) {
            Ok(store) => {
                clear_last_error();
                let state = Box::new(NsgIndexState { inner: nsg_core::NsgIndex::new(store, metric) });
                Box::into_raw(state).cast::<NsgIndex>()
            }
            Err(e) => {
                set_last_error(e);
                ptr::null_mut()
            }
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Free an index
///
/// Passing NULL is a no-op.
///
/// # Safety
///
/// - `ptr` must be NULL or a pointer returned by `nsg_new()`
/// - `ptr` must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_free(ptr: *mut NsgIndex) {
    let _ = ffi_guard(|| {
        if !ptr.is_null() {
            // SAFETY: Caller guarantees ptr came from Box::into_raw in nsg_new
            drop(unsafe { Box::from_raw(ptr.cast::<NsgIndexState>()) });
        }
    });
}

//
// === CONSTRUCTION ===
//

/// Build the graph from an initial k-NN graph file
///
/// # Arguments
///
/// - `ptr`: Non-NULL pointer to index (requires exclusive access)
/// - `knng_path`: UTF-8 path to the k-NN graph file
/// - `l`: Candidate search width
/// - `r`: Maximum out-degree
/// - `c`: Candidate pool cap
///
/// # Returns
///
/// - 0 on success
/// - -1 on failure (check `nsg_last_error_message()`)
///
/// # Safety
///
/// - `ptr` must be non-NULL and valid
/// - `knng_path` must be a valid NUL-terminated string
/// - No other thread may access `ptr` during this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_build(
    ptr: *mut NsgIndex,
    knng_path: *const c_char,
    l: size_t,
    r: size_t,
    c: size_t,
) -> c_int {
    ffi_guard(|| {
        // SAFETY: Caller guarantees ptr is valid and exclusively held
        let Some(index) = (unsafe { index_mut(ptr) }) else {
            set_last_error("Null index pointer");
            return -1;
        };
        // SAFETY: Caller guarantees knng_path is a valid C string
        let path = match unsafe { path_arg(knng_path) } {
            Ok(path) => path,
            Err(msg) => {
                set_last_error(msg);
                return -1;
            }
        };

        status(index.build_from_file(path, &BuildParams::new(l, r, c)))
    })
    .unwrap_or(-1)
}

/// Build the optimized search layout from the current graph
///
/// Must be called again after `nsg_build()` or `nsg_load()` before
/// `nsg_search_opt()` can be used.
///
/// # Safety
///
/// - `ptr` must be non-NULL and valid
/// - No other thread may access `ptr` during this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_optimize_graph(ptr: *mut NsgIndex) -> c_int {
    ffi_guard(|| {
        // SAFETY: Caller guarantees ptr is valid and exclusively held
        let Some(index) = (unsafe { index_mut(ptr) }) else {
            set_last_error("Null index pointer");
            return -1;
        };
        status(index.optimize_graph())
    })
    .unwrap_or(-1)
}

//
// === SEARCH ===
//

/// Shared body of `nsg_search` and `nsg_search_opt`.
///
/// # Safety
///
/// Same contract as `nsg_search`.
#[allow(clippy::too_many_arguments)]
unsafe fn search_into(
    ptr: *const NsgIndex,
    query: *const c_float,
    len: size_t,
    k: size_t,
    search_l: size_t,
    out_ids: *mut u32,
    out_dists: *mut c_float,
    optimized: bool,
) -> size_t {
    ffi_guard(|| {
        // SAFETY: Caller guarantees ptr is valid (shared access)
        let Some(index) = (unsafe { index_ref(ptr) }) else {
            set_last_error("Null index pointer");
            return 0;
        };

        if query.is_null() || out_ids.is_null() || out_dists.is_null() {
            set_last_error("Null buffer pointers");
            return 0;
        }

        // SAFETY: Caller guarantees query points to len valid floats
        let query_slice = unsafe { slice::from_raw_parts(query, len) };

        let results: nsg_core::Result<Vec<SearchResult>> = if optimized {
            index.search_opt(query_slice, k, search_l)
        } else {
            index.search(query_slice, k, search_l)
        };

        match results {
            Ok(results) => {
                // SAFETY: Caller guarantees both buffers hold at least k
                // elements, and results.len() <= k
                let ids = unsafe { slice::from_raw_parts_mut(out_ids, results.len()) };
                let dists = unsafe { slice::from_raw_parts_mut(out_dists, results.len()) };
                for ((result, id), dist) in results.iter().zip(ids).zip(dists) {
                    *id = result.id;
                    *dist = result.distance;
                }

                clear_last_error();
                results.len()
            }
            Err(e) => {
                set_last_error(e);
                0
            }
        }
    })
    .unwrap_or(0)
}

/// Search for the k nearest neighbors with a beam of width `search_l`
///
/// # Returns
///
/// - Number of results written (<= k) on success
/// - 0 on failure (check `nsg_last_error_message()`)
///
/// # Output Format
///
/// Results are sorted by distance (ascending):
/// - `out_ids[0]` = closest point id
/// - `out_dists[0]` = distance to closest point
///
/// # Example (C)
///
/// ```c
/// uint32_t ids[10];
/// float dists[10];
/// size_t count = nsg_search(index, query, 128, 10, 40, ids, dists);
/// ```
///
/// # Safety
///
/// - `ptr` must be non-NULL and valid
/// - `query` must point to `len` valid floats
/// - `out_ids` and `out_dists` must each have space for `k` values
/// - Buffers must not overlap
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_search(
    ptr: *const NsgIndex,
    query: *const c_float,
    len: size_t,
    k: size_t,
    search_l: size_t,
    out_ids: *mut u32,
    out_dists: *mut c_float,
) -> size_t {
    // SAFETY: Contract forwarded to the caller
    unsafe { search_into(ptr, query, len, k, search_l, out_ids, out_dists, false) }
}

/// Search over the optimized layout
///
/// Returns exactly what `nsg_search()` would. Fails if
/// `nsg_optimize_graph()` has not run since the last build or load.
///
/// # Safety
///
/// Same as `nsg_search()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_search_opt(
    ptr: *const NsgIndex,
    query: *const c_float,
    len: size_t,
    k: size_t,
    search_l: size_t,
    out_ids: *mut u32,
    out_dists: *mut c_float,
) -> size_t {
    // SAFETY: Contract forwarded to the caller
    unsafe { search_into(ptr, query, len, k, search_l, out_ids, out_dists, true) }
}

//
// === PERSISTENCE ===
//

/// Save the graph to `path`
///
/// # Safety
///
/// - `ptr` must be non-NULL and valid
/// - `path` must be a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_save(ptr: *const NsgIndex, path: *const c_char) -> c_int {
    ffi_guard(|| {
        // SAFETY: Caller guarantees ptr is valid (shared access)
        let Some(index) = (unsafe { index_ref(ptr) }) else {
            set_last_error("Null index pointer");
            return -1;
        };
        // SAFETY: Caller guarantees path is a valid C string
        match unsafe { path_arg(path) } {
            Ok(path) => status(index.save(path)),
            Err(msg) => {
                set_last_error(msg);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

/// Replace the graph with one loaded from `path`
///
/// The file must describe exactly as many points as the index holds. On
/// failure the index keeps its previous graph.
///
/// # Safety
///
/// - `ptr` must be non-NULL and valid
/// - `path` must be a valid NUL-terminated string
/// - No other thread may access `ptr` during this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_load(ptr: *mut NsgIndex, path: *const c_char) -> c_int {
    ffi_guard(|| {
        // SAFETY: Caller guarantees ptr is valid and exclusively held
        let Some(index) = (unsafe { index_mut(ptr) }) else {
            set_last_error("Null index pointer");
            return -1;
        };
        // SAFETY: Caller guarantees path is a valid C string
        match unsafe { path_arg(path) } {
            Ok(path) => status(index.load(path)),
            Err(msg) => {
                set_last_error(msg);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

//
// === INTROSPECTION ===
//

/// Number of points in the index, or 0 if `ptr` is NULL
///
/// # Safety
///
/// - `ptr` must be NULL or valid
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_len(ptr: *const NsgIndex) -> size_t {
    // SAFETY: Caller guarantees ptr is NULL or valid
    ffi_guard(|| unsafe { index_ref(ptr) }.map_or(0, nsg_core::NsgIndex::len)).unwrap_or(0)
}

/// Vector dimensionality, or 0 if `ptr` is NULL
///
/// # Safety
///
/// - `ptr` must be NULL or valid
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nsg_dimensions(ptr: *const NsgIndex) -> size_t {
    // SAFETY: Caller guarantees ptr is NULL or valid
    ffi_guard(|| unsafe { index_ref(ptr) }.map_or(0, nsg_core::NsgIndex::dimensions)).unwrap_or(0)
}

//
// === ERROR HANDLING ===
//

/// Get the last error message for the current thread
///
/// # Returns
///
/// - Pointer to NUL-terminated error string
/// - NULL if the last call on this thread succeeded
///
/// # Lifetime
///
/// The returned pointer is valid until the next FFI call on this thread.
/// **Do NOT** free the returned pointer.
#[unsafe(no_mangle)]
pub extern "C" fn nsg_last_error_message() -> *const c_char {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(ptr::null(), |s| s.as_ptr()))
}

//
// === VERSIONING ===
//

/// Get the library version
///
/// The returned pointer is valid for the lifetime of the program.
/// **Do NOT** free the returned pointer.
#[unsafe(no_mangle)]
pub extern "C" fn nsg_version() -> *const c_char {
    // concat! appends the NUL terminator required by C
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

    VERSION.as_ptr().cast::<c_char>()
}

//
// === TESTS ===
//
