/// Position of a molecular property inside the fingerprint schema.
/// Example: `417`
pub type PropertyIndex = usize;
/// Structure key shared by duplicate measurements of one compound.
/// Uses the first block of an InChIKey. Example: `RYYVLZVUVIJVGH`
pub type StructureKey = String;
/// Identifier of a validation record.
/// Example: `CCMSLIB00000001547`
pub type RecordId = String;
/// Identifier of a compound supplied by a dataset.
/// Example: `RYYVLZVUVIJVGH-UHFFFAOYSA-N`
pub type CompoundId = String;
/// Monotonic batch iteration number shared by producer loops.
pub type Iteration = u64;
/// Index of a compound inside a dataset.
pub type CompoundIndex = usize;
