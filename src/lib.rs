/*!
 * quasar-streamer: a multi-threaded engine that streams very large files
 * (model weights, tensor blobs) from a POSIX filesystem or an
 * S3/GCS/Azure object store into a caller-supplied host buffer.
 *
 * The caller issues one aggregate request covering many files and many
 * sub-ranges per file; the engine delivers one completion event per
 * sub-range as soon as its bytes are in place, so early tensors can be
 * consumed while later ones are still being fetched.
 *
 * # Example
 *
 * ```no_run
 * use quasar_streamer::{Credentials, DstBuffer, FileRequest, Streamer};
 *
 * fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let mut streamer = Streamer::new()?;
 *
 *     let mut buffer = vec![0u8; 1 << 20];
 *     let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
 *
 *     let file = FileRequest {
 *         path: "/models/weights.bin".to_string(),
 *         offset: 0,
 *         bytesize: 1 << 20,
 *         sub_sizes: vec![1 << 19, 1 << 19],
 *     };
 *     streamer.request(&[file], dst, Credentials::default())?;
 *
 *     loop {
 *         let response = streamer.response();
 *         if response.ret == quasar_streamer::ResponseCode::FinishedError {
 *             break;
 *         }
 *         println!("sub request {} of file {}: {}", response.index, response.file_index, response.ret);
 *     }
 *     Ok(())
 * }
 * ```
 */

pub mod backend;
pub mod config;
pub mod credentials;
pub mod destination;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod range;
pub mod responder;
pub mod response_code;
pub mod streamer;
pub mod uri;

pub use config::Config;
pub use credentials::Credentials;
pub use destination::DstBuffer;
pub use error::{Result, StreamerError};
pub use logging::init_logging;
pub use responder::{Responder, Response};
pub use response_code::ResponseCode;
pub use streamer::{FileRequest, Streamer};
pub use uri::{Scheme, StorageUri};
