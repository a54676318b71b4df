//! Platform USB context handed to the device transport
//!
//! On platforms where the USB stack cannot enumerate devices by itself (Android
//! being the usual case) the host application owns an environment handle that
//! the transport needs before any device is opened. This crate only carries
//! that handle around; it never dereferences it and never frees it.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::error::DeviceError;

/// Externally owned, non-null platform USB context.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbContext {
    handle: NonNull<c_void>,
}

// The handle is opaque to us and its lifetime is managed by the platform layer.
unsafe impl Send for UsbContext {}
unsafe impl Sync for UsbContext {}

impl UsbContext {
    /// Wrap a raw platform handle. Returns `None` for a null pointer.
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|handle| Self { handle })
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.handle.as_ptr()
    }
}

impl fmt::Debug for UsbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UsbContext({:p})", self.handle)
    }
}

/// Environment passed to `DeviceBinding::open`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformEnv {
    usb_context: Option<UsbContext>,
}

impl PlatformEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for a raw handle; a null pointer leaves the context unset.
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self {
            usb_context: UsbContext::from_raw(ptr),
        }
    }

    pub fn with_usb_context(mut self, ctx: UsbContext) -> Self {
        self.usb_context = Some(ctx);
        self
    }

    pub fn usb_context(&self) -> Option<UsbContext> {
        self.usb_context
    }
}

/// The USB transport collaborator.
///
/// Implementations must treat a context they cannot use as
/// [`DeviceError::NoContext`].
pub trait UsbTransport {
    fn set_platform_context(&self, ctx: UsbContext) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_has_no_context() {
        assert!(UsbContext::from_raw(std::ptr::null_mut()).is_none());
        assert!(PlatformEnv::from_raw(std::ptr::null_mut()).usb_context().is_none());
    }

    #[test]
    fn test_context_round_trips_pointer() {
        let mut marker = 0u8;
        let ptr = &mut marker as *mut u8 as *mut c_void;
        let ctx = UsbContext::from_raw(ptr).unwrap();
        assert_eq!(ctx.as_raw(), ptr);
        assert_eq!(PlatformEnv::new().with_usb_context(ctx).usb_context(), Some(ctx));
    }
}
