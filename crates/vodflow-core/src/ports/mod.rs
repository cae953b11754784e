//! Ports - the seams between the orchestration core and the outside world.
//!
//! Each trait hides one external concern (persistence, time, id generation,
//! remote-service credentials). Implementations live in `impls`; the manager,
//! reconciler and callback ingestor depend only on these traits.

pub mod clock;
pub mod credentials;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::credentials::CredentialProvider;
pub use self::id_generator::{SlugIdGenerator, WorkOrderIdGenerator, slugify};
pub use self::store::WorkOrderStore;
