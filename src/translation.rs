//! Translation graph resolution for expression queries.
//!
//! A translation of an expression is another expression sharing a meaning
//! with it (distance 1), or reached through an intermediate expression that
//! shares a meaning with both (distance 2). Matches are aggregated per
//! (expression, translation) pair and scored by the database's
//! `grp_quality_*` functions.

use crate::catalog::ColumnMap;
use crate::predicate::{matchers, validate};
use crate::query_builder::{Comparison, Join, Predicate, SelectQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::query_context::QueryContext;

/// Parameters that switch an expression query into translation mode.
pub const TRIGGER_PARAMS: [&str; 5] = [
    "trans_expr",
    "trans_langvar",
    "trans_uid",
    "trans_txt",
    "trans_txt_degr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityAlgo {
    #[default]
    Geometric,
    Arithmetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationOptions {
    pub distance: u8,
    pub quality_min: i64,
    pub quality_algo: QualityAlgo,
    /// Per-edge quality floor for the source side.
    pub source_quality_min: Option<i64>,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        TranslationOptions {
            distance: 1,
            quality_min: 0,
            quality_algo: QualityAlgo::Geometric,
            source_quality_min: None,
        }
    }
}

impl TranslationOptions {
    fn source_quality_floor(&self) -> Option<i64> {
        self.source_quality_min.filter(|q| *q > 0)
    }

    /// Aggregate quality of all paths to one translation.
    pub fn quality_expr(&self) -> &'static str {
        match (self.distance, self.quality_algo) {
            (1, _) => "grp_quality_score(array_agg(denotation.grp), array_agg(denotation.quality))",
            (_, QualityAlgo::Geometric) => {
                "grp_quality_expr_score_geo2(array_agg(denotation.grp), array_agg(denotationsrc.grp), \
                 array_agg(denotation.quality), array_agg(denotationsrc.quality), array_agg(denotation2.expr))"
            }
            (_, QualityAlgo::Arithmetic) => {
                "grp_quality_score(array_agg(denotation.grp) || array_agg(denotationsrc.grp), \
                 array_agg(denotation.quality) || array_agg(denotationsrc.quality))"
            }
        }
    }

    /// One JSON array per path, with one object per hop.
    pub fn trans_path_expr(&self) -> &'static str {
        if self.distance == 1 {
            "array_agg(json_build_array(json_build_object('meaning', denotationsrc.meaning, \
             'source', denotationsrc.source, 'denotation1', denotationsrc.id, \
             'denotation2', denotation.id))) as trans_path"
        } else {
            "array_agg(json_build_array(json_build_object('meaning', denotationsrc.meaning, \
             'source', denotationsrc.source, 'denotation1', denotationsrc.id, \
             'denotation2', denotation2.id, 'expr2', denotation2.expr, 'langvar2', denotation2.langvar), \
             json_build_object('meaning', denotation.meaning, 'source', denotation.source, \
             'denotation1', denotation3.id, 'denotation2', denotation.id))) as trans_path"
        }
    }
}

pub fn is_requested(ctx: &QueryContext) -> bool {
    TRIGGER_PARAMS.iter().any(|p| ctx.has(p))
}

/// Parse the `trans_*` options into `ctx.state.translation` when any
/// trigger parameter is present.
pub fn parse_options(ctx: &mut QueryContext) -> Result<(), ApiError> {
    if !is_requested(ctx) {
        return Ok(());
    }

    let mut opts = TranslationOptions::default();

    if let Some(v) = ctx.consume("trans_distance") {
        let distance = validate::positive_integer(&v, "trans_distance")?;
        if distance > 2 {
            return Err(ApiError::invalid(
                "the parameter \"trans_distance\" must be 1 or 2",
            ));
        }
        opts.distance = distance as u8;
    }

    if let Some(v) = ctx.consume("trans_quality_min") {
        opts.quality_min = validate::non_negative_integer(&v, "trans_quality_min", false)?;
    }

    if let Some(v) = ctx.consume("trans_quality_algo") {
        opts.quality_algo = match validate::string(&v, "trans_quality_algo", false, false)? {
            "geometric" => QualityAlgo::Geometric,
            "arithmetic" => QualityAlgo::Arithmetic,
            _ => {
                return Err(ApiError::invalid(
                    "the parameter \"trans_quality_algo\" must be \"geometric\" or \"arithmetic\"",
                ))
            }
        };
    }

    if let Some(v) = ctx.consume("trans_source_quality_min") {
        let q = validate::non_negative_integer(&v, "trans_source_quality_min", false)?;
        if q > 9 {
            return Err(ApiError::invalid(
                "the parameter \"trans_source_quality_min\" must be an integer in the range from 0 to 9",
            ));
        }
        opts.source_quality_min = Some(q);
    }

    ctx.state.translation = Some(opts);
    Ok(())
}

fn raw(sql: &str) -> Predicate {
    Predicate::Raw(SqlFragment::raw(sql))
}

/// Join the denotation chain from `expr` to the translation's denotation,
/// aliased `denotationsrc`, and group by the expression id.
pub fn join_translation(ctx: &mut QueryContext, opts: &TranslationOptions) -> Result<(), ApiError> {
    ctx.ensure_join(Join::on_columns(
        "denotationx as denotation",
        "denotation.expr",
        "expr.id",
    ));

    if opts.distance == 1 {
        ctx.ensure_join(Join::inner(
            "denotationx as denotationsrc",
            vec![
                Predicate::columns_eq("denotationsrc.meaning", "denotation.meaning"),
                raw("denotationsrc.expr != denotation.expr"),
            ],
        ));
    } else {
        let diff_langvar = ctx
            .consume_bool("interm1_expr_diff_langvar")?
            .unwrap_or(false);

        ctx.ensure_join(Join::inner(
            "denotationx as denotation2",
            vec![
                Predicate::columns_eq("denotation2.meaning", "denotation.meaning"),
                if diff_langvar {
                    raw("denotation2.langvar != denotation.langvar")
                } else {
                    raw("denotation2.expr != denotation.expr")
                },
            ],
        ));

        let mut on3 = vec![Predicate::columns_eq("denotation3.expr", "denotation2.expr")];
        if let Some(floor) = opts.source_quality_floor() {
            on3.push(Predicate::compare(
                "denotation3.quality",
                Comparison::AtLeast(SqlFragment::new("?", vec![SqlValue::Int(floor)])),
            ));
        }
        ctx.ensure_join(Join::inner("denotationx as denotation3", on3));

        ctx.ensure_join(Join::inner(
            "denotationx as denotationsrc",
            vec![
                Predicate::columns_eq("denotationsrc.meaning", "denotation3.meaning"),
                raw("denotationsrc.grp != denotation.grp"),
                raw("denotationsrc.expr != denotation.expr"),
                if diff_langvar {
                    raw("denotationsrc.langvar != denotation3.langvar")
                } else {
                    raw("denotationsrc.expr != denotation3.expr")
                },
            ],
        ));
    }

    ctx.group_by(&["expr.id"]);
    Ok(())
}

/// Project the translation columns and the requested `trans_*` includes.
pub fn select_translation(
    ctx: &mut QueryContext,
    map: &ColumnMap,
    opts: &TranslationOptions,
) -> Result<(), ApiError> {
    join_translation(ctx, opts)?;

    ctx.select_cols(map, &["trans_expr"]);
    ctx.group_by(&["denotationsrc.expr"]);

    if ctx.includes("trans_path") {
        ctx.select_expr(opts.trans_path_expr());
    }

    if ctx.includes("trans_langvar") {
        ctx.select_col(map, "trans_langvar");
        ctx.group_by(&["denotationsrc.langvar"]);
    }

    if ctx.includes("trans_uid") {
        ctx.ensure_join(Join::on_columns(
            "langvar as langvarsrc",
            "langvarsrc.id",
            "denotationsrc.langvar",
        ));
        ctx.select_col(map, "trans_uid");
        ctx.group_by(&["langvarsrc.lang_code", "langvarsrc.var_code"]);
    }

    for (item, group) in [("trans_txt", "exprsrc.txt"), ("trans_txt_degr", "exprsrc.txt_degr")] {
        if ctx.includes(item) {
            ctx.ensure_join(Join::on_columns("expr as exprsrc", "exprsrc.id", "denotationsrc.expr"));
            ctx.select_col(map, item);
            ctx.group_by(&[group]);
        }
    }

    if ctx.includes("trans_quality") {
        ctx.mark_sortable("trans_quality");
        ctx.select_expr(&format!("{} as trans_quality", opts.quality_expr()));
    }

    Ok(())
}

/// Apply the `trans_*` and `interm1_*` filters.
///
/// `num_params` is the count of non-translation search parameters; returns
/// the number of translation search parameters applied.
pub fn translation_conditions(
    ctx: &mut QueryContext,
    opts: &TranslationOptions,
    counting: bool,
    num_params: usize,
) -> Result<usize, ApiError> {
    let mut num_trans = 0;
    let mut num_extra = 0;
    let mut target: Vec<Predicate> = Vec::new();
    let txt_target = ctx.has("trans_txt") || ctx.has("trans_txt_degr");

    if counting {
        join_translation(ctx, opts)?;
    }

    if let Some(v) = ctx.consume_array("trans_expr")? {
        let cmp = matchers::id(&v, "trans_expr")?;
        if txt_target {
            target.push(Predicate::compare("expr.id", cmp));
        } else {
            ctx.filter(Predicate::compare("denotationsrc.expr", cmp));
        }
        num_trans += 1;
    }

    if let Some(v) = ctx.consume_array("trans_langvar")? {
        let cmp = matchers::id(&v, "trans_langvar")?;
        if txt_target {
            target.push(Predicate::compare("expr.langvar", cmp));
        } else {
            ctx.filter(Predicate::compare("denotationsrc.langvar", cmp));
        }
        num_extra += 1;
    }

    if let Some(v) = ctx.consume_array("trans_uid")? {
        let cmp = matchers::uid_langvar(&v, "trans_uid")?;
        if txt_target {
            target.push(Predicate::compare("expr.langvar", cmp));
        } else {
            ctx.filter(Predicate::compare("denotationsrc.langvar", cmp));
        }
        num_extra += 1;
    }

    if let Some(v) = ctx.consume_array("trans_txt")? {
        target.push(Predicate::compare("expr.txt", matchers::txt_nfc(&v, "trans_txt")?));
        num_trans += 1;
    }

    if let Some(v) = ctx.consume_array("trans_txt_degr")? {
        target.push(Predicate::compare(
            "expr.txt_degr",
            matchers::txt_degr(&v, "trans_txt_degr")?,
        ));
        num_trans += 1;
    }

    for (param, col) in [("trans_source", "denotationsrc.source"), ("trans_grp", "denotationsrc.grp")] {
        if let Some(v) = ctx.consume_array(param)? {
            ctx.filter(Predicate::compare(col, matchers::id(&v, param)?));
        }
    }

    if !target.is_empty() {
        let mut subquery = SelectQuery::from("expr").select_raw("expr.id");
        subquery.filters = target;
        ctx.filter(Predicate::compare(
            "denotationsrc.expr",
            Comparison::InQuery(Box::new(subquery)),
        ));
    }

    if opts.quality_min > 0 {
        ctx.query.push_having(Predicate::compare(
            opts.quality_expr(),
            Comparison::AtLeast(SqlFragment::new("?", vec![SqlValue::Int(opts.quality_min)])),
        ));
    }

    if let Some(floor) = opts.source_quality_floor() {
        ctx.filter(Predicate::compare(
            "denotation.quality",
            Comparison::AtLeast(SqlFragment::new("?", vec![SqlValue::Int(floor)])),
        ));
    }

    if opts.distance == 2 {
        if num_params == 0 || num_trans == 0 {
            return Err(ApiError::invalid(
                "when doing distance-2 translations, you must specify (1) at least one of the \
                 \"expr\", \"lang_code\", \"langvar\", \"range\", \"txt_degr\", \"txt\", or \"uid\" \
                 parameters; and (2) at least one of of the \"trans_expr\", \"trans_txt\", or \
                 \"trans_txt_degr\" parameters",
            ));
        }
        interm1_conditions(ctx)?;
    }

    Ok(num_trans + num_extra)
}

fn interm1_conditions(ctx: &mut QueryContext) -> Result<(), ApiError> {
    for (param, col) in [
        ("interm1_source", "denotation.source"),
        ("interm1_grp", "denotation.grp"),
        ("interm1_expr_langvar", "denotation2.langvar"),
    ] {
        if let Some(v) = ctx.consume_array(param)? {
            ctx.filter(Predicate::compare(col, matchers::id(&v, param)?));
        }
    }

    if let Some(v) = ctx.consume_array("interm1_expr_uid")? {
        ctx.filter(Predicate::compare(
            "denotation2.langvar",
            matchers::uid_langvar(&v, "interm1_expr_uid")?,
        ));
    }
    Ok(())
}
