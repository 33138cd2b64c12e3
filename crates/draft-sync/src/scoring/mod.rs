pub mod modifiers;
pub mod projections;

pub use modifiers::{
    build_modifier_table, get_stat_modifier_value, parse_league_settings, LeagueSettings,
    ModifierContext, StatModifierTable,
};
pub use projections::{load_projections, ProjectionError, ProjectionSet};
