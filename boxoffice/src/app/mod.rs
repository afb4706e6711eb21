//! Application services.
//!
//! Each service owns one flow over the store traits in `boxoffice-core`:
//!
//! - [`ReservationCoordinator`]: holds, explicit releases, order reads
//! - [`RollbackHandler`]: delayed rollback deliveries
//! - [`PaymentService`]: payment confirmation and ticket issuance
//! - [`TicketScanner`]: door scans
//! - [`AdmissionService`]: tier status and admin counter commands

pub mod admission;
pub mod coordinator;
pub mod payments;
pub mod rollback;
pub mod scanning;

pub use admission::{AdmissionService, InventoryCommand, TierSnapshot};
pub use coordinator::{Reservation, ReservationCoordinator, ReservationPolicy, ReserveTickets};
pub use payments::{PaymentConfirmation, PaymentDependencies, PaymentNotification, PaymentService};
pub use rollback::RollbackHandler;
pub use scanning::TicketScanner;
