//! Portable clause builders shared by every dialect.

use super::{FromClauseBuilder, OrderByClauseBuilder, SelectClauseBuilder, WhereClauseBuilder};

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSelect;

impl SelectClauseBuilder for StandardSelect {}

/// FROM with staged-table substitution.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFrom;

impl FromClauseBuilder for StandardFrom {}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardWhere;

impl WhereClauseBuilder for StandardWhere {}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardOrderBy;

impl OrderByClauseBuilder for StandardOrderBy {}
