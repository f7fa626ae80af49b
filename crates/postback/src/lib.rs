//! # Postback
//!
//! Post-back reconciliation and all-or-nothing data modification for
//! server-rendered forms.
//!
//! ## Core Concepts
//!
//! Postback separates **what the page was built with** from **what came back**:
//! - [`BoundValue`] = a control's durable value reconciled against the request
//! - [`Validation`] = a check that gates a commit
//! - [`ModificationUnit`](ModificationUnits) = ordered validations plus at most one commit action
//!
//! The key principle: **One Post-Back = One Unit = One Commit Path**.
//! Either every validation of the unit passes and the whole commit path runs,
//! or nothing the request did stays visible.
//!
//! ## Architecture
//!
//! ```text
//! Request fields
//!     │
//!     ▼ receive()
//! SubmittedValueStore ─────────────────────────────┐
//!     │                                            │
//!     ▼ get_value()                                │
//! BoundValue (per control)                         │
//!     │                                            │
//!     ▼ create_validation()                        │
//! ValidationScope ─► Validation ─► ModificationUnit│
//!                                        │         │
//!                                        ▼         │
//!                              execute()           │
//!                     ┌──────────┴─────────┐       │
//!                     ▼                    ▼       │
//!                 Blocked              Committing  │
//!              (re-render)          ┌──────┴─────┐ │
//!                                   ▼            ▼ │
//!                              Committed    RolledBack
//!                                                  │
//! VisibilityLink / DiffCheckBoxList ◄──────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Reads are pure** - A bound value is a function of its durable value and the store
//! 2. **Three-state reads** - Present, cleared by narrowing, and never submitted are distinct
//! 3. **One commit action per unit** - A second one is a protocol violation
//! 4. **Every validation reports** - Its messages reach the error sink even when empty
//! 5. **No partial commits** - A failing commit path is rolled back and its error returned unchanged
//! 6. **One region per unit** - Once a unit holds validations from one scope, no other scope may add to it
//! 7. **Invalid input blocks** - A bound value or selection list with unmappable input fails its validation
//!
//! ## Guarantees
//!
//! - **Single-threaded**: Scopes and registries are `!Send`; a request is processed on one thread
//! - **Synchronous**: There is no async suspension and nothing to cancel
//! - **No cross-request state**: Durability belongs to the [`TransactionalResource`]
//!
//! ## Example
//!
//! ```ignore
//! use postback_core::{mappers, PageConfig, PostBack, PostBackPage, RawValue};
//!
//! let page = PostBackPage::builder(PageConfig::new())
//!     .receive(fields, |key| key != "__csrf")?
//!     .build();
//!
//! // 1. Declare units and controls
//! let save = page.add_unit("save");
//! let name = page.bound_value(|| user.name.clone(), || "name".into(), mappers::text);
//! page.track_changes(save, name.clone());
//!
//! // 2. Register validations through an explicit scope
//! let scope = page.scope();
//! scope.with_modification_units(&[save], |scope| {
//!     name.create_validation(scope, page.store(), |value, _changed, validator| {
//!         validator.get_string(value, false, 100, "name");
//!     })
//! })??;
//!
//! // 3. One commit action
//! let store = page.store().clone();
//! page.units().add_modification_method(save, move || {
//!     repo.rename(user.id, &name.established_value(&store))
//! })?;
//!
//! // 4. Dispatch and render
//! page.add_post_back(PostBack::new("save", save).skip_if_no_changes(true))?;
//! let report = page.dispatch("save", None, &mut db)?;
//! let output = page.finalize();
//! ```
//!
//! ## What This Is Not
//!
//! Postback is **not**:
//! - A markup or widget renderer
//! - A SQL builder or persistence layer
//! - A retry engine
//!
//! Postback **is**:
//! > The reconciliation and commit protocol every form on a page relies on.

// Core modules
mod bound_value;
mod client_state;
mod config;
mod error;
mod execute;
mod page;
mod scope;
mod selection;
mod store;
mod unit;
mod validation;
mod validator;
mod visibility;

// Testing utilities are in the separate postback-testing crate


// Re-export store types
pub use store::{RawValue, Submitted, SubmittedValueStore};

// Re-export bound value types
pub use bound_value::{
    mappers, BoundValue, ChangeSource, PostBackValue, Publish, DEFAULT_INVALID_MESSAGE,
};

// Re-export validation types
pub use validation::{Validation, ValidationId};
pub use validator::{ErrorSink, ValidationErrors, Validator};

// Re-export scope types
pub use scope::{EffectivePredicate, Predicate, RegionId, ValidationScope};

// Re-export unit and execution types
pub use execute::{ActionPair, ExecuteOptions, ExecuteOutcome, TransactionalResource};
pub use unit::{ModificationUnits, UnitId, UnitState};

// Re-export error types
pub use error::{ExecuteError, ProtocolResult, ProtocolViolation};

// Re-export visibility and selection types
pub use selection::{DiffCheckBoxList, DiffRadioList, SelectionChange, SelectionDelta};
pub use visibility::{DisplayRule, DisplayState, Polarity, ReactiveBinding, VisibilityLink};

// Re-export page types (primary entry point)
pub use client_state::ClientState;
pub use config::{PageConfig, UnexpectedDataPolicy};
pub use page::{DispatchReport, PageBuilder, PageOutput, PostBack, PostBackPage, RequestId};
