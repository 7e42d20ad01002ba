//! Vulkan instance management.
//!
//! Creates the `VkInstance` with the window-system extensions the platform
//! layer reports, and optionally the Khronos validation layer with a debug
//! messenger that forwards into `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use kiln_rhi::instance::{Instance, InstanceDesc};
//!
//! # fn example(window_extensions: &[*const std::ffi::c_char]) -> kiln_rhi::RhiResult<()> {
//! let instance = Instance::new(&InstanceDesc {
//!     application_name: c"Kiln",
//!     enable_validation: cfg!(debug_assertions),
//!     window_extensions,
//! })?;
//! let vk_instance = instance.handle();
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Parameters for [`Instance::new`].
pub struct InstanceDesc<'a> {
    /// Reported to drivers through `VkApplicationInfo`.
    pub application_name: &'a CStr,
    /// Request the validation layer and debug messenger.
    pub enable_validation: bool,
    /// Surface extensions required by the windowing system.
    pub window_extensions: &'a [*const c_char],
}

/// Vulkan instance wrapper with optional validation layer support.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    /// Present only when validation is active.
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// A validation request on a system without the layer logs a warning
    /// and continues without it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the Vulkan library cannot be loaded
    /// - a window-system extension is not available
    /// - instance or debug messenger creation fails
    pub fn new(desc: &InstanceDesc<'_>) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = desc.enable_validation && Self::is_validation_layer_available(&entry)?;
        if desc.enable_validation && !validation {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        Self::check_extensions(&entry, desc.window_extensions)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(desc.application_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Kiln")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = desc.window_extensions.to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created ({} extension(s), validation: {})",
            extensions.len(),
            validation
        );

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_utils.is_some()
    }

    fn check_extensions(entry: &Entry, required: &[*const c_char]) -> RhiResult<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };

        for &name_ptr in required {
            let name = unsafe { CStr::from_ptr(name_ptr) };
            let found = available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name));
            if !found {
                return Err(RhiError::MissingExtension(name.to_string_lossy().into_owned()));
            }
        }

        Ok(())
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        Ok(available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger created");

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Log level a validation message is forwarded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageLevel {
    Error,
    Warn,
    Info,
    Debug,
}

fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> MessageLevel {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        MessageLevel::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        MessageLevel::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        MessageLevel::Info
    } else {
        MessageLevel::Debug
    }
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    match message_level(message_severity) {
        MessageLevel::Error => error!(target: "kiln::vulkan", "[{:?}] {}", message_type, message),
        MessageLevel::Warn => warn!(target: "kiln::vulkan", "[{:?}] {}", message_type, message),
        MessageLevel::Info => info!(target: "kiln::vulkan", "[{:?}] {}", message_type, message),
        MessageLevel::Debug => debug!(target: "kiln::vulkan", "[{:?}] {}", message_type, message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_level_mapping() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(message_level(S::ERROR), MessageLevel::Error);
        assert_eq!(message_level(S::WARNING), MessageLevel::Warn);
        assert_eq!(message_level(S::INFO), MessageLevel::Info);
        assert_eq!(message_level(S::VERBOSE), MessageLevel::Debug);
    }

    #[test]
    fn test_instance_creation_without_validation() {
        let result = Instance::new(&InstanceDesc {
            application_name: c"kiln-test",
            enable_validation: false,
            window_extensions: &[],
        });
        match result {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_missing_window_extension_is_reported() {
        let bogus = [c"VK_KILN_not_a_real_extension".as_ptr()];
        let result = Instance::new(&InstanceDesc {
            application_name: c"kiln-test",
            enable_validation: false,
            window_extensions: &bogus,
        });
        match result {
            Err(RhiError::MissingExtension(name)) => {
                assert_eq!(name, "VK_KILN_not_a_real_extension");
            }
            Err(RhiError::LoadingError(_)) | Err(RhiError::VulkanError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Ok(_) => panic!("bogus extension accepted"),
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
