//! Rastro: stable element identity over a mutating live tree.
//!
//! Rastro (Spanish: "trail/trace") tracks logical identity for the elements
//! of a document that frameworks tear down and rebuild on every render.
//! Each tracked element gets a multi-attribute fingerprint; when the host
//! replaces a node, confidence-scored matching re-binds the stored identity
//! to the replacement instead of reporting a remove/add pair.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      RASTRO Pipeline                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//! │  │ Live     │   │ Tree     │   │ Matcher  │   │ Tracker  │  │
//! │  │ Document │──►│ Builder  │──►│ (fuzzy + │──►│ (batch + │  │
//! │  │ (host)   │   │ +Finger- │   │  exact + │   │  grace   │  │
//! │  │          │   │  prints  │   │  struct) │   │  period) │  │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations accumulate between [`TreeTracker::pump`] calls and are
//! reconciled as one batch, mirroring how a framework commit lands as a
//! single settled re-render.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod builder;
mod clock;
mod config;
mod dom;
mod events;
mod fingerprint;
mod geometry;
mod matcher;
mod result;
mod session;
mod similarity;
mod tracker;

pub use builder::{
    BuildOutput, BuiltEntry, DomTree, FormState, InteractiveKind, NodeKind, TreeBuilder, TreeNode,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    ConfigPatch, MatchWeights, TrackerConfig, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_GRACE_PERIOD_MS, DEFAULT_POSITION_THRESHOLD_PX,
};
pub use dom::{
    ComputedStyle, LiveDocument, LiveNode, LiveRef, MutationRecord, ObserverFilter, ObserverToken,
    SelectOption, LANDMARK_ROLES, LANDMARK_TAGS,
};
pub use events::{EventBus, HandlerToken, NodeChanges, TrackerEvent, TrackerEventKind};
pub use fingerprint::{
    is_high_entropy_class, is_stable_identifier, normalize_href, AncestorStep, Fingerprint,
    LandmarkAnchor, NeighborContext, ANCESTOR_DEPTH,
};
pub use geometry::{BoundingBox, Point, Viewport};
pub use matcher::{MatchContext, MatchDetails, MatchResult, MatchStrategy, Matcher};
pub use result::{ActionOutcome, RastroError, RastroResult};
pub use session::SessionStore;
pub use similarity::{
    aspect_ratio_similarity, bigram_similarity, jaro_winkler, levenshtein_similarity,
    normalize_text, overlap_ratio, position_similarity, size_similarity, text_similarity,
    token_set_similarity, visual_similarity,
};
pub use tracker::{NodeStatus, TrackedNode, TreeTracker};
