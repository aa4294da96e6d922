//! Built-in program images.
//!
//! These are the kernel's boot-time collaborators: `init`, the Pipeline
//! Manager, the DKMS driver supervisor, and a pair of demo drivers. They
//! are deliberately small; the interesting machinery is the kernel
//! surface they exercise.

pub mod dkms;
pub mod drivers;
pub mod init;
pub mod pipeline;

use std::sync::Arc;

use crate::sandbox::Program;

/// The standard image set registered by the binary and the system tests.
pub fn standard_images() -> Vec<(String, Arc<dyn Program>)> {
    vec![
        ("/bin/init".to_string(), init::image()),
        ("/sys/pipeline".to_string(), pipeline::image()),
        ("/sys/dkms".to_string(), dkms::image()),
        ("/drivers/null.sys".to_string(), drivers::null_image()),
        ("/drivers/vtty.sys".to_string(), drivers::vtty_image()),
    ]
}
