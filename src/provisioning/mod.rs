//! Device provisioning over a short-range link
//!
//! A peer writes JSON requests in arbitrary fragments; each complete request
//! gets exactly one JSON response. Provisioning ends once the device has
//! been registered.

mod handler;
mod link;
mod reassembler;

pub use handler::ProvisioningHandler;
pub use link::run_provisioning;
