//! services/api/src/adapters/payments.rs
//!
//! A payment rail that moves no money. It logs each release and refund so
//! the session's payment status can be exercised end to end without a
//! provider.

use async_trait::async_trait;
use tracing::info;
use tutoring_core::ports::{PaymentRail, PortResult};
use tutoring_core::Session;

#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedPaymentRail;

#[async_trait]
impl PaymentRail for SimulatedPaymentRail {
    async fn release(&self, session: &Session) -> PortResult<()> {
        info!(
            session_id = %session.id,
            tutor_id = %session.tutor_id,
            amount = session.total_amount,
            "payment released to tutor"
        );
        Ok(())
    }

    async fn refund(&self, session: &Session) -> PortResult<()> {
        info!(
            session_id = %session.id,
            student_id = %session.student_id,
            amount = session.total_amount,
            "payment refunded to student"
        );
        Ok(())
    }
}
