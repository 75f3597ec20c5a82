pub mod availability;
pub mod booking;
pub mod directory;
pub mod lifecycle;
pub mod notification;
pub mod repository;

pub use availability::AvailabilityService;
pub use booking::{AppointmentBookingService, TestSmsOutcome};
pub use directory::DirectoryService;
pub use lifecycle::AppointmentLifecycleService;
pub use notification::{NotificationEvent, NotificationRecipient, NotificationResult, NotificationService};
pub use repository::{AppointmentRangeFilter, AppointmentRepository};
