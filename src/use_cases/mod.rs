pub mod check_status;
pub mod make_payment;
pub mod submit_payment;
pub mod track_outcome;

pub use check_status::{CheckStatus, CheckStatusError, StatusCheck};
pub use make_payment::{MakePayment, MakePaymentError};
pub use submit_payment::{SubmitPayment, SubmitPaymentError};
pub use track_outcome::{TrackOutcome, TrackOutcomeError};
