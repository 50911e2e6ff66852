// Agreement records and their persistence
// The store is the only owner of record state; everything else goes through `update`

pub mod file_store;
pub mod store;
pub mod types;

pub use file_store::FileSystemAgreementStore;
pub use store::{AgreementScan, AgreementStore, InMemoryAgreementStore, RecordMutator};
pub use types::{
    AgreementFieldsUpdate, AgreementFilter, AgreementId, AgreementPage, AgreementRecord,
    AgreementStatus, HandoffState, ListCursor, NewAgreement, PageRequest, StepDataUpdate,
    StepState,
};
