//! Heuristic event classification from collector query parameters.
//!
//! The collector wire format does not label events; the kind has to be read
//! off the discriminating parameters of each request. The rules live in an
//! ordered table, specific before generic, and the first match wins. The
//! parameter names come from the documented Piwik PRO / Matomo HTTP tracking
//! dictionary (`e_c`/`e_a` custom events, `idgoal` conversions, `search`
//! site search, and so on).
//!
//! `classify` is pure and total: the same parameter sequence always maps to
//! the same kind, and input that matches nothing - including the empty
//! sequence - comes back as `BrokenEvent` rather than an error.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::fmt;
use tagscope_common::Param;

/// Semantic kind of one logical tracking event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    CustomEvent,
    SiteSearch,
    GoalConversion,
    EcommerceOrder,
    CartUpdate,
    Outlink,
    Download,
    ContentInteraction,
    ContentImpression,
    HeartbeatPing,
    /// No rule matched, or the parameter set was empty or unusable.
    BrokenEvent,
}

impl EventKind {
    /// Human label the panel renders in the event list.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::PageView => "Page View",
            EventKind::CustomEvent => "Custom Event",
            EventKind::SiteSearch => "Site Search",
            EventKind::GoalConversion => "Goal Conversion",
            EventKind::EcommerceOrder => "Ecommerce Order",
            EventKind::CartUpdate => "Cart Update",
            EventKind::Outlink => "Outlink",
            EventKind::Download => "Download",
            EventKind::ContentInteraction => "Content Interaction",
            EventKind::ContentImpression => "Content Impression",
            EventKind::HeartbeatPing => "Heartbeat Ping",
            EventKind::BrokenEvent => "Broken Event",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A check over parameter presence/value. Rules are built from these, so
/// each one stays order-insensitive over its input sequence.
#[derive(Debug, Clone)]
enum Predicate {
    /// A parameter with this name is present
    Has(&'static str),
    /// A parameter with this name and exactly this value is present
    Equals(&'static str, &'static str),
    AllOf(&'static [Predicate]),
    AnyOf(&'static [Predicate]),
}

impl Predicate {
    fn matches(&self, params: &[Param]) -> bool {
        match self {
            Predicate::Has(name) => params.iter().any(|p| p.name == *name),
            Predicate::Equals(name, value) => {
                params.iter().any(|p| p.name == *name && p.value == *value)
            }
            Predicate::AllOf(inner) => inner.iter().all(|p| p.matches(params)),
            Predicate::AnyOf(inner) => inner.iter().any(|p| p.matches(params)),
        }
    }
}

struct Rule {
    kind: EventKind,
    when: Predicate,
}

/// Discriminator table, evaluated top to bottom. Ordering is load-bearing:
/// an ecommerce order also carries `idgoal=0`, a custom event usually also
/// carries `url`, so the specific rules must sit above the generic ones.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            kind: EventKind::CustomEvent,
            when: Predicate::AllOf(&[Predicate::Has("e_c"), Predicate::Has("e_a")]),
        },
        Rule {
            kind: EventKind::SiteSearch,
            when: Predicate::Has("search"),
        },
        Rule {
            kind: EventKind::EcommerceOrder,
            when: Predicate::AllOf(&[Predicate::Equals("idgoal", "0"), Predicate::Has("ec_id")]),
        },
        Rule {
            kind: EventKind::CartUpdate,
            when: Predicate::Equals("idgoal", "0"),
        },
        Rule {
            kind: EventKind::GoalConversion,
            when: Predicate::Has("idgoal"),
        },
        Rule {
            kind: EventKind::Outlink,
            when: Predicate::Has("link"),
        },
        Rule {
            kind: EventKind::Download,
            when: Predicate::Has("download"),
        },
        Rule {
            kind: EventKind::ContentInteraction,
            when: Predicate::AllOf(&[Predicate::Has("c_n"), Predicate::Has("c_i")]),
        },
        Rule {
            kind: EventKind::ContentImpression,
            when: Predicate::Has("c_n"),
        },
        Rule {
            kind: EventKind::HeartbeatPing,
            when: Predicate::Has("ping"),
        },
        Rule {
            kind: EventKind::PageView,
            when: Predicate::AnyOf(&[Predicate::Has("action_name"), Predicate::Has("url")]),
        },
    ]
});

/// Classify one logical request's parameter sequence.
pub fn classify(params: &[Param]) -> EventKind {
    if params.is_empty() {
        return EventKind::BrokenEvent;
    }
    RULES
        .iter()
        .find(|rule| rule.when.matches(params))
        .map(|rule| rule.kind)
        .unwrap_or(EventKind::BrokenEvent)
}
