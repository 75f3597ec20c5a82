pub mod receipts;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use receipts::DeliveryReceiptService;
pub use scheduler::ReminderSchedulerService;
pub use store::ReminderStore;
pub use worker::ReminderDeliveryWorker;
