//! The [`DeviceBinding`] trait – primitive operation set of a vendor camera
//! driver.
//!
//! A binding is a thin, synchronous wrapper around the vendor SDK.  It
//! accepts **one outstanding operation at a time**: issuing a property call
//! while a frame grab is in flight is undefined behaviour at this layer.
//! Callers never use a binding directly; the kernel's
//! `DeviceGate` owns it and serialises every call.
//!
//! Limits default to the full numeric range, so a binding only needs to
//! override the ones its SDK actually reports.

use camctl_types::{AutoMode, CamError, Limits, LightSourcePreset};

/// A vendor camera driver.
///
/// All methods take `&mut self`: exclusivity is part of the contract.
///
/// # Errors
///
/// Every fallible method returns a [`CamError`].  Rejected values should be
/// reported as [`CamError::PropertyRejected`]; transport or driver faults as
/// [`CamError::Device`].
pub trait DeviceBinding: Send {
    /// Load and initialise the vendor library.  Called exactly once, when a
    /// session is constructed.
    fn initialize(&mut self) -> Result<(), CamError> {
        Ok(())
    }

    /// Open the device.  Opening an already open device is a no-op.
    fn open(&mut self) -> Result<(), CamError>;

    /// Close the device.  Must tolerate being called on a device that is
    /// already closed or only partially opened.
    fn close(&mut self) -> Result<(), CamError>;

    fn is_open(&self) -> bool;

    /// Model identifier, e.g. `"acA1300-200uc"`.  An empty string means no
    /// usable camera answered.
    fn model_id(&mut self) -> Result<String, CamError>;

    /// `true` while a frame grab is in progress on the device side.
    fn is_busy(&mut self) -> Result<bool, CamError>;

    /// Pull one raw frame: interleaved RGB triples, row-major.
    fn grab_raw_frame(&mut self) -> Result<Vec<u8>, CamError>;

    // ── Frame geometry ──────────────────────────────────────────────────

    fn frame_width(&mut self) -> Result<u32, CamError>;
    fn frame_height(&mut self) -> Result<u32, CamError>;
    fn set_frame_width(&mut self, width: u32) -> Result<(), CamError>;
    fn set_frame_height(&mut self, height: u32) -> Result<(), CamError>;

    // ── Exposure ────────────────────────────────────────────────────────

    /// Exposure time in microseconds.
    fn exposure_time_us(&mut self) -> Result<u32, CamError>;
    fn set_exposure_time_us(&mut self, exposure_us: u32) -> Result<(), CamError>;
    fn exposure_limits(&mut self) -> Result<Limits<u32>, CamError> {
        Ok(Limits::new(0, u32::MAX))
    }
    fn exposure_auto(&mut self) -> Result<AutoMode, CamError>;
    fn set_exposure_auto(&mut self, mode: AutoMode) -> Result<(), CamError>;

    // ── Gain ────────────────────────────────────────────────────────────

    /// Gain in dB.
    fn gain_db(&mut self) -> Result<f64, CamError>;
    fn set_gain_db(&mut self, gain_db: f64) -> Result<(), CamError>;
    fn gain_limits(&mut self) -> Result<Limits<f64>, CamError> {
        Ok(Limits::new(f64::MIN, f64::MAX))
    }
    fn gain_auto(&mut self) -> Result<AutoMode, CamError>;
    fn set_gain_auto(&mut self, mode: AutoMode) -> Result<(), CamError>;

    // ── Image quality ───────────────────────────────────────────────────

    fn sharpness(&mut self) -> Result<f64, CamError>;
    fn set_sharpness(&mut self, level: f64) -> Result<(), CamError>;
    fn sharpness_limits(&mut self) -> Result<Limits<f64>, CamError> {
        Ok(Limits::new(f64::MIN, f64::MAX))
    }

    fn gamma(&mut self) -> Result<f64, CamError>;
    fn set_gamma(&mut self, gamma: f64) -> Result<(), CamError>;
    fn gamma_limits(&mut self) -> Result<Limits<f64>, CamError> {
        Ok(Limits::new(f64::MIN, f64::MAX))
    }

    // ── Colour ──────────────────────────────────────────────────────────

    fn white_balance_auto(&mut self) -> Result<AutoMode, CamError>;
    fn set_white_balance_auto(&mut self, mode: AutoMode) -> Result<(), CamError>;

    fn light_source(&mut self) -> Result<LightSourcePreset, CamError>;
    fn set_light_source(&mut self, preset: LightSourcePreset) -> Result<(), CamError>;

    /// Restore every device setting to its factory default.
    fn reset_factory_defaults(&mut self) -> Result<(), CamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal binding that only answers the model query; everything else
    /// reports a device fault.  Exercises the default limit methods.
    struct ModelOnly {
        open: bool,
    }

    fn unsupported<T>(op: &str) -> Result<T, CamError> {
        Err(CamError::device(op, "unsupported"))
    }

    impl DeviceBinding for ModelOnly {
        fn open(&mut self) -> Result<(), CamError> {
            self.open = true;
            Ok(())
        }
        fn close(&mut self) -> Result<(), CamError> {
            self.open = false;
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn model_id(&mut self) -> Result<String, CamError> {
            Ok("model-only".to_string())
        }
        fn is_busy(&mut self) -> Result<bool, CamError> {
            Ok(false)
        }
        fn grab_raw_frame(&mut self) -> Result<Vec<u8>, CamError> {
            unsupported("grab_raw_frame")
        }
        fn frame_width(&mut self) -> Result<u32, CamError> {
            unsupported("frame_width")
        }
        fn frame_height(&mut self) -> Result<u32, CamError> {
            unsupported("frame_height")
        }
        fn set_frame_width(&mut self, _: u32) -> Result<(), CamError> {
            unsupported("set_frame_width")
        }
        fn set_frame_height(&mut self, _: u32) -> Result<(), CamError> {
            unsupported("set_frame_height")
        }
        fn exposure_time_us(&mut self) -> Result<u32, CamError> {
            unsupported("exposure_time_us")
        }
        fn set_exposure_time_us(&mut self, _: u32) -> Result<(), CamError> {
            unsupported("set_exposure_time_us")
        }
        fn exposure_auto(&mut self) -> Result<AutoMode, CamError> {
            unsupported("exposure_auto")
        }
        fn set_exposure_auto(&mut self, _: AutoMode) -> Result<(), CamError> {
            unsupported("set_exposure_auto")
        }
        fn gain_db(&mut self) -> Result<f64, CamError> {
            unsupported("gain_db")
        }
        fn set_gain_db(&mut self, _: f64) -> Result<(), CamError> {
            unsupported("set_gain_db")
        }
        fn gain_auto(&mut self) -> Result<AutoMode, CamError> {
            unsupported("gain_auto")
        }
        fn set_gain_auto(&mut self, _: AutoMode) -> Result<(), CamError> {
            unsupported("set_gain_auto")
        }
        fn sharpness(&mut self) -> Result<f64, CamError> {
            unsupported("sharpness")
        }
        fn set_sharpness(&mut self, _: f64) -> Result<(), CamError> {
            unsupported("set_sharpness")
        }
        fn gamma(&mut self) -> Result<f64, CamError> {
            unsupported("gamma")
        }
        fn set_gamma(&mut self, _: f64) -> Result<(), CamError> {
            unsupported("set_gamma")
        }
        fn white_balance_auto(&mut self) -> Result<AutoMode, CamError> {
            unsupported("white_balance_auto")
        }
        fn set_white_balance_auto(&mut self, _: AutoMode) -> Result<(), CamError> {
            unsupported("set_white_balance_auto")
        }
        fn light_source(&mut self) -> Result<LightSourcePreset, CamError> {
            unsupported("light_source")
        }
        fn set_light_source(&mut self, _: LightSourcePreset) -> Result<(), CamError> {
            unsupported("set_light_source")
        }
        fn reset_factory_defaults(&mut self) -> Result<(), CamError> {
            unsupported("reset_factory_defaults")
        }
    }

    #[test]
    fn default_initialize_succeeds() {
        let mut dev = ModelOnly { open: false };
        assert!(dev.initialize().is_ok());
    }

    #[test]
    fn default_limits_are_permissive() {
        let mut dev = ModelOnly { open: false };
        assert!(dev.exposure_limits().unwrap().contains(u32::MAX));
        assert!(dev.gain_limits().unwrap().contains(-1.0e9));
        assert!(dev.gamma_limits().unwrap().contains(1.0e9));
        assert!(dev.sharpness_limits().unwrap().contains(0.0));
    }

    #[test]
    fn binding_is_usable_as_trait_object() {
        let mut dev: Box<dyn DeviceBinding> = Box::new(ModelOnly { open: false });
        dev.open().unwrap();
        assert!(dev.is_open());
        assert_eq!(dev.model_id().unwrap(), "model-only");
        assert!(matches!(dev.gamma(), Err(CamError::Device { .. })));
    }
}
