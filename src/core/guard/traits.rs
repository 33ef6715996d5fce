/*!
 * Guard Traits
 *
 * Shared surface of the executor's RAII guards
 */

use super::{GuardMetadata, GuardResult};

/// A resource that is released when the guard goes out of scope
pub trait Guard: Send {
    /// Short name used in log fields
    fn resource_type(&self) -> &'static str;

    fn metadata(&self) -> &GuardMetadata;

    /// True until the resource is committed or released
    fn is_active(&self) -> bool;

    /// Release early; a second release is `AlreadyReleased`
    fn release(&mut self) -> GuardResult<()>;
}

/// Cleanup hook invoked from `Drop`. Must log instead of panicking.
pub trait GuardDrop: Guard {
    fn on_drop(&mut self);
}

/// A guard that can be poisoned by a panic in the code it protects
///
/// A poisoned guard refuses further work. `recover` releases the underlying
/// resource so the caller can continue with a clean slate.
pub trait Recoverable: Guard {
    fn is_poisoned(&self) -> bool;

    /// No-op unless poisoned
    fn recover(&mut self) -> GuardResult<()>;

    fn poison_reason(&self) -> Option<&str>;

    fn poison(&mut self, reason: String);
}
