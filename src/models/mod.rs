// Models module - Database entity representations

pub mod booking;
pub mod class_instance;
pub mod credit_transaction;
pub mod member;
pub mod package;
pub mod schedule;

pub use booking::{Booking, BookingStatus};
pub use class_instance::ClassInstance;
pub use credit_transaction::{CreditTransaction, TransactionType};
pub use member::{Child, Member, MemberRole};
pub use package::{MemberPackage, PackagePriceOverride, SessionPackage};
pub use schedule::ClassSchedule;
