//! The package protocol: a 16-byte header followed by a typed payload,
//! carried over any ordered byte stream.

pub mod codec;
pub mod dispatch;
pub mod header;
pub mod package;
pub mod stream;

pub use codec::{MAX_PAYLOAD_SIZE, PackageCodec};
pub use dispatch::{PackageHandler, dispatch};
pub use header::{HEADER_SIZE, PACKAGE_TYPE_BOUND, PackageHeader, PackageType};
pub use package::Package;
pub use stream::{PackageStream, ReadMode};
