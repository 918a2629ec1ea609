//! Video4Linux2 capture node driven through raw streaming-I/O ioctls.
//!
//! The `v4l` crate's own mmap stream manages queueing itself, which would
//! hide slot order from the ring. Here the ring stays in charge and this
//! type only translates its calls into `VIDIOC_*` requests.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::path::Path;
use std::ptr;
use std::slice;

use tracing::debug;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::capture::device::{CaptureDevice, DequeuedBuffer};
use crate::capture::types::{PixelFormat, StreamConfig};
use crate::error::CaptureError;

struct Mapping {
    ptr: *mut u8,
    len: usize,
}

/// A V4L2 capture device opened in non-blocking mode.
pub struct V4l2Device {
    device: Device,
    name: String,
    mappings: Vec<Option<Mapping>>,
}

// SAFETY: the mappings are only mutated through `&mut self` and only read
// through `&self`; the raw pointers never leave this value.
unsafe impl Send for V4l2Device {}
unsafe impl Sync for V4l2Device {}

fn last_os(op: &'static str, source: io::Error) -> CaptureError {
    CaptureError::DeviceIo { op, source }
}

impl V4l2Device {
    /// Open the node at `path` and check that it can stream video.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let device = Device::with_path(path).map_err(|e| last_os("open device", e))?;

        let caps = device
            .query_caps()
            .map_err(|e| last_os("VIDIOC_QUERYCAP", e))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unsupported(format!(
                "{} is not a video capture device",
                path.display()
            )));
        }
        if !caps.capabilities.contains(Flags::STREAMING) {
            return Err(CaptureError::Unsupported(format!(
                "{} does not support streaming I/O",
                path.display()
            )));
        }

        debug!("opened {} ({})", path.display(), caps.card);
        Ok(Self {
            device,
            name: format!("{} ({})", path.display(), caps.card),
            mappings: Vec::new(),
        })
    }

    fn fd(&self) -> std::os::raw::c_int {
        self.device.handle().fd()
    }

    fn capture_buffer(&self, index: usize) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index as u32;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn stream_ioctl(
        &self,
        op: &'static str,
        request: vidioc::_IOC_TYPE,
    ) -> Result<(), CaptureError> {
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: STREAMON/STREAMOFF take a pointer to the buffer type.
        unsafe { v4l2::ioctl(self.fd(), request, &mut typ as *mut _ as *mut c_void) }
            .map_err(|e| last_os(op, e))
    }

    fn unmap_all(&mut self) -> Vec<CaptureError> {
        (0..self.mappings.len())
            .filter_map(|i| self.unmap_buffer(i).err())
            .collect()
    }
}

impl CaptureDevice for V4l2Device {
    fn set_format(&mut self, requested: StreamConfig) -> Result<StreamConfig, CaptureError> {
        let fmt = Format::new(
            requested.width,
            requested.height,
            FourCC::new(&requested.format.fourcc()),
        );
        let actual = Capture::set_format(&self.device, &fmt)
            .map_err(|e| last_os("VIDIOC_S_FMT", e))?;

        let format = PixelFormat::from_fourcc(actual.fourcc.repr).ok_or_else(|| {
            CaptureError::Unsupported(format!("device switched to pixel format {}", actual.fourcc))
        })?;
        Ok(StreamConfig::new(actual.width, actual.height, format))
    }

    fn request_buffers(&mut self, count: usize) -> Result<usize, CaptureError> {
        // SAFETY: plain old data.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count as u32;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        // SAFETY: `req` is a valid, initialised request struct.
        unsafe {
            v4l2::ioctl(
                self.fd(),
                vidioc::VIDIOC_REQBUFS,
                &mut req as *mut _ as *mut c_void,
            )
        }
        .map_err(|e| last_os("VIDIOC_REQBUFS", e))?;

        let granted = req.count as usize;
        self.mappings = (0..granted).map(|_| None).collect();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError> {
        let mut buf = self.capture_buffer(index);
        // SAFETY: `buf` identifies an allocated mmap buffer by index.
        unsafe {
            v4l2::ioctl(
                self.fd(),
                vidioc::VIDIOC_QUERYBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        }
        .map_err(|e| last_os("VIDIOC_QUERYBUF", e))?;

        let len = buf.length as usize;
        // SAFETY: QUERYBUF on an mmap buffer fills the `offset` member.
        let offset = unsafe { buf.m.offset };
        // SAFETY: offset and length come from QUERYBUF for this descriptor.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(last_os("mmap", io::Error::last_os_error()));
        }

        let slot = self
            .mappings
            .get_mut(index)
            .ok_or_else(|| CaptureError::io("mmap", format!("no buffer {index}")))?;
        *slot = Some(Mapping {
            ptr: ptr as *mut u8,
            len,
        });
        Ok(len)
    }

    fn buffer(&self, index: usize) -> &[u8] {
        match self.mappings.get(index) {
            // SAFETY: the mapping stays valid until `unmap_buffer`, which
            // needs `&mut self`.
            Some(Some(m)) => unsafe { slice::from_raw_parts(m.ptr, m.len) },
            _ => &[],
        }
    }

    fn queue(&mut self, index: usize) -> Result<(), CaptureError> {
        let mut buf = self.capture_buffer(index);
        // SAFETY: `buf` names a mapped capture buffer.
        unsafe {
            v4l2::ioctl(
                self.fd(),
                vidioc::VIDIOC_QBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        }
        .map_err(|e| last_os("VIDIOC_QBUF", e))
    }

    fn dequeue(&mut self) -> Result<Option<DequeuedBuffer>, CaptureError> {
        let mut buf = self.capture_buffer(0);
        // SAFETY: the driver fills in `buf`.
        let res = unsafe {
            v4l2::ioctl(
                self.fd(),
                vidioc::VIDIOC_DQBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        };
        match res {
            Ok(()) => Ok(Some(DequeuedBuffer {
                index: buf.index as usize,
                bytes_used: buf.bytesused as usize,
                sequence: u64::from(buf.sequence),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(last_os("VIDIOC_DQBUF", e)),
        }
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.stream_ioctl("VIDIOC_STREAMON", vidioc::VIDIOC_STREAMON)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stream_ioctl("VIDIOC_STREAMOFF", vidioc::VIDIOC_STREAMOFF)
    }

    fn unmap_buffer(&mut self, index: usize) -> Result<(), CaptureError> {
        let Some(mapping) = self.mappings.get_mut(index).and_then(Option::take) else {
            return Ok(());
        };
        // SAFETY: `mapping` came from a successful mmap and is unmapped once.
        let rc = unsafe { libc::munmap(mapping.ptr as *mut c_void, mapping.len) };
        if rc != 0 {
            return Err(last_os("munmap", io::Error::last_os_error()));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        let mut errors = self.unmap_all();
        if let Err(e) = self.request_buffers(0) {
            errors.push(e);
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CaptureError::Teardown(errors)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        for e in self.unmap_all() {
            tracing::warn!("{}: {e}", self.name);
        }
    }
}
