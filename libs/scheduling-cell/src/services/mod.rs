pub mod admission;
pub mod cache;
pub mod calendar;
pub mod clock;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod resolver;
pub mod time_off;

pub use admission::{AdmissionOutcome, BookingAdmissionService};
pub use cache::AvailabilityCache;
pub use calendar::CalendarRulesService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::ScheduleEventBroadcaster;
pub use ledger::{AppointmentView, BookingLedger};
pub use lifecycle::AppointmentLifecycleService;
pub use locks::SlotLockRegistry;
pub use resolver::{evaluate_request, partition_day, resolve_day, AvailabilityResolver, DaySchedule};
pub use time_off::TimeOffRegistry;
