pub mod availability;
pub mod booking;
pub mod bulk;
pub mod materializer;
pub mod template;

pub use availability::AvailabilityService;
pub use booking::BookingService;
pub use bulk::BulkAuthoringService;
pub use template::TemplateService;
