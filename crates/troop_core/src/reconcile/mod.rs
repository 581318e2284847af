//! Child-collection reconciliation for parent updates.
//!
//! # Responsibility
//! - Turn a keyed submitted change set into tagged insert/update/delete
//!   entries.
//! - Compute the target state of a parent's child collection as a pure
//!   in-memory step, before anything touches storage.
//!
//! # Invariants
//! - Children not referenced by the change set stay untouched; omission
//!   never deletes.
//! - A delete entry removes its child and ignores any field edits sent
//!   along with it.
//! - An entry claiming an identifier outside the parent's collection is
//!   rejected before any mutation; it is never downgraded to an insert.
//! - Validation failures abort the whole reconciliation; there is no
//!   partial application.
//! - No entry is both created and destroyed within one reconciliation.

use crate::model::FieldViolation;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Child record type usable by [`reconcile`].
///
/// Implementors connect a concrete child (event date, event question) to
/// the generic insert/update/delete machinery.
pub trait Reconcilable: Sized {
    /// Submitted field set applied on insert and update.
    type Fields;

    /// Stable identifier of a persisted child.
    fn id(&self) -> Uuid;

    /// Constructs a new child owned by `parent` from submitted fields.
    fn new_scoped(parent: Uuid, fields: &Self::Fields) -> Self;

    /// Overwrites the updatable fields of an existing child.
    fn apply_fields(&mut self, fields: &Self::Fields);

    /// Returns all broken field constraints, empty when valid.
    fn validate(&self) -> Vec<FieldViolation>;
}

/// Wire-level record of one change-set entry, keyed by an existing child
/// identifier rendered as text or by an opaque placeholder string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRecord<F> {
    /// Explicit identifier claim; takes precedence over the key.
    pub id: Option<Uuid>,
    /// Field updates; `None` when the entry only flags a deletion.
    pub fields: Option<F>,
    /// Deletion marker (`_destroy` in form conventions).
    pub delete: bool,
}

impl<F> SubmittedRecord<F> {
    /// Entry carrying field updates for an insert or in-place update.
    pub fn fields(fields: F) -> Self {
        Self {
            id: None,
            fields: Some(fields),
            delete: false,
        }
    }

    /// Entry flagging an existing child for removal.
    pub fn deletion() -> Self {
        Self {
            id: None,
            fields: None,
            delete: true,
        }
    }

    /// Sets the explicit identifier claim.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// One resolved change-set entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEntry<F> {
    Insert { fields: F },
    Update { id: Uuid, fields: F },
    Delete { id: Uuid },
}

/// Tagged change set consumed exactly once by [`reconcile`].
///
/// Entries keep their submitted key so validation errors can point back
/// at the record the caller sent.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet<F> {
    entries: Vec<(String, ChangeEntry<F>)>,
}

impl<F> ChangeSet<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a tagged change set from the keyed wire form.
    ///
    /// Resolution rules:
    /// - an entry's identifier is its explicit `id`, falling back to the
    ///   key when the key parses as a UUID;
    /// - identified entries become updates, or deletes when flagged;
    /// - unidentified entries with fields become inserts;
    /// - unidentified entries flagged for deletion are dropped, so no
    ///   child is created and destroyed in the same request;
    /// - entries with neither fields nor a deletion flag carry nothing to
    ///   apply and are dropped as well.
    pub fn from_keyed(records: BTreeMap<String, SubmittedRecord<F>>) -> Self {
        let mut entries = Vec::new();
        for (key, record) in records {
            let id = record.id.or_else(|| Uuid::parse_str(&key).ok());
            let entry = match (id, record.fields, record.delete) {
                // Field edits sent along with a deletion are ignored.
                (Some(id), _, true) => ChangeEntry::Delete { id },
                (Some(id), Some(fields), false) => ChangeEntry::Update { id, fields },
                (None, Some(fields), false) => ChangeEntry::Insert { fields },
                (None, _, true) | (_, None, false) => continue,
            };
            entries.push((key, entry));
        }
        Self { entries }
    }

    pub fn push(&mut self, key: impl Into<String>, entry: ChangeEntry<F>) {
        self.entries.push((key.into(), entry));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(String, ChangeEntry<F>)] {
        &self.entries
    }
}

/// Validation failures of one submitted record, attributed by its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Change-set key of the failing record.
    pub key: String,
    pub violations: Vec<FieldViolation>,
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry `{}`:", self.key)?;
        for violation in &self.violations {
            write!(f, " {violation};")?;
        }
        Ok(())
    }
}

/// Reconciliation failure; nothing has been applied when returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// One or more records failed field constraints.
    Validation(Vec<FieldError>),
    /// An entry claimed an identifier outside the parent's collection.
    UnresolvedReference { key: String, id: Uuid },
    /// Two entries resolved to the same existing child.
    DuplicateReference { key: String, id: Uuid },
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => {
                write!(f, "validation failed for {} record(s):", errors.len())?;
                for error in errors {
                    write!(f, " {error}")?;
                }
                Ok(())
            }
            Self::UnresolvedReference { key, id } => write!(
                f,
                "entry `{key}` references {id}, which is not part of the collection"
            ),
            Self::DuplicateReference { key, id } => {
                write!(f, "entry `{key}` references {id} more than once")
            }
        }
    }
}

impl Error for ReconcileError {}

/// Result of a successful reconciliation.
///
/// `children` is the full target collection. The reconciler makes no
/// ordering promise; callers needing a display order re-sort by an
/// explicit key.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome<C> {
    pub children: Vec<C>,
    pub inserted: Vec<C>,
    pub updated: Vec<C>,
    pub deleted: Vec<Uuid>,
}

impl<C> ReconcileOutcome<C> {
    /// Whether applying the outcome would change stored state.
    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }
}

/// Computes the target state of a parent's child collection.
///
/// Pure in-memory step: resolves every entry against `existing`, applies
/// field updates and removals, constructs new children scoped to
/// `parent`, and validates the result. Persistence happens afterwards,
/// atomically, from the returned outcome.
///
/// # Errors
/// - [`ReconcileError::UnresolvedReference`] /
///   [`ReconcileError::DuplicateReference`] on the first integrity
///   violation, before any field is applied.
/// - [`ReconcileError::Validation`] collecting every broken field across
///   all updated and inserted children.
pub fn reconcile<C>(
    parent: Uuid,
    existing: &[C],
    changes: &ChangeSet<C::Fields>,
) -> Result<ReconcileOutcome<C>, ReconcileError>
where
    C: Reconcilable + Clone,
{
    let by_id: HashMap<Uuid, &C> = existing.iter().map(|child| (child.id(), child)).collect();
    let mut referenced: HashSet<Uuid> = HashSet::new();

    let mut inserted: Vec<(&str, C)> = Vec::new();
    let mut updated: Vec<(&str, C)> = Vec::new();
    let mut deleted: Vec<Uuid> = Vec::new();

    for (key, entry) in changes.entries() {
        match entry {
            ChangeEntry::Update { id, fields } => {
                let child = resolve(&by_id, &mut referenced, key, *id)?;
                let mut next = child.clone();
                next.apply_fields(fields);
                updated.push((key.as_str(), next));
            }
            ChangeEntry::Delete { id } => {
                resolve(&by_id, &mut referenced, key, *id)?;
                deleted.push(*id);
            }
            ChangeEntry::Insert { fields } => {
                inserted.push((key.as_str(), C::new_scoped(parent, fields)));
            }
        }
    }

    let mut errors: Vec<FieldError> = Vec::new();
    for (key, child) in updated.iter().chain(inserted.iter()) {
        let violations = child.validate();
        if !violations.is_empty() {
            errors.push(FieldError {
                key: (*key).to_string(),
                violations,
            });
        }
    }
    if !errors.is_empty() {
        return Err(ReconcileError::Validation(errors));
    }

    let inserted: Vec<C> = inserted.into_iter().map(|(_, child)| child).collect();
    let updated: Vec<C> = updated.into_iter().map(|(_, child)| child).collect();

    let mut children: Vec<C> = existing
        .iter()
        .filter(|child| !referenced.contains(&child.id()))
        .cloned()
        .collect();
    children.extend(updated.iter().cloned());
    children.extend(inserted.iter().cloned());

    Ok(ReconcileOutcome {
        children,
        inserted,
        updated,
        deleted,
    })
}

fn resolve<'a, C>(
    by_id: &HashMap<Uuid, &'a C>,
    referenced: &mut HashSet<Uuid>,
    key: &str,
    id: Uuid,
) -> Result<&'a C, ReconcileError>
where
    C: Reconcilable,
{
    let child = by_id
        .get(&id)
        .copied()
        .ok_or_else(|| ReconcileError::UnresolvedReference {
            key: key.to_string(),
            id,
        })?;
    if !referenced.insert(id) {
        return Err(ReconcileError::DuplicateReference {
            key: key.to_string(),
            id,
        });
    }
    Ok(child)
}
