//! orchard-collector - Credential Refresh & Measurement Worker
//!
//! Two loops in one process: the token refresher keeps platform credentials
//! valid ahead of expiry, and the measurement loop works the 48h/7d/30d
//! rounds — collecting metrics (with synthetic fallback), recording actuals
//! against prediction snapshots, scheduling follow-up rounds and curation.

pub mod measurement;
pub mod refresher;
