use std::sync::Arc;

use lazy_static::lazy_static;
use serde_json::Value;

use super::{correlated, dedup, entity_routes, filter_param, lateral_include, Entity, NUMERIC_ID};
use crate::catalog::{ColumnMap, ColumnOverride};
use crate::pagination::ListingOptions;
use crate::predicate::matchers;
use crate::query_builder::{Join, Predicate, SelectQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::pipeline::Route;
use crate::server::query_context::QueryContext;

const COLS: [&str; 16] = [
    "author",
    "grp",
    "id",
    "ip_claim",
    "ip_claimant",
    "ip_claimant_email",
    "isbn",
    "label",
    "license",
    "note",
    "publisher",
    "quality",
    "reg_date",
    "title",
    "url",
    "year",
];

lazy_static! {
    static ref COLUMNS: ColumnMap = ColumnMap::build(
        "source",
        &COLS,
        &[
            (
                "denotation_count_estimate",
                ColumnOverride::Expr("source_editorial.denotation_count"),
            ),
            ("directory", ColumnOverride::Expr("source_editorial.directory")),
        ],
    );
}

/// License codes and their display names.
const LICENSES: [(&str, &str); 11] = [
    ("cc", "Creative Commons"),
    ("co", "copyright"),
    ("gd", "GNU Free Documentation License"),
    ("gl", "GNU Lesser General Public License"),
    ("gp", "GNU General Public License"),
    ("mi", "MIT License"),
    ("na", "unknown"),
    ("nr", "public domain"),
    ("pl", "PanLex Use Permission"),
    ("rp", "request"),
    ("zz", "other"),
];

pub struct Source;

fn license_name(code: &str) -> Value {
    LICENSES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| Value::from(*name))
        .unwrap_or(Value::Null)
}

/// Counts arrive as text when the driver widens them past i64.
fn as_number(value: &mut Value) {
    if let Some(n) = value.as_str().and_then(|s| s.parse::<i64>().ok()) {
        *value = Value::from(n);
    }
}

impl Entity for Source {
    const NAME: &'static str = "source";
    const FROM: &'static str = "source";
    const LABEL: &'static str = "source";
    const ARRAY_PARAMS: &'static [&'static str] = &[
        "id",
        "expr",
        "format",
        "grp",
        "label",
        "langvar",
        "trans_expr",
        "uid",
        "usr",
    ];
    const LISTING: ListingOptions = ListingOptions {
        id_field: "id",
        table: "source",
        search_required: None,
        unlimited: true,
    };

    fn column_map() -> &'static ColumnMap {
        &COLUMNS
    }

    fn select(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.select_cols(&COLUMNS, &COLS);

        for item in ["directory", "denotation_count_estimate"] {
            if ctx.includes(item) {
                ctx.ensure_left_join(Join::on_columns(
                    "source_editorial",
                    "source_editorial.source",
                    "source.id",
                ));
                ctx.select_col(&COLUMNS, item);
            }
        }

        if ctx.includes("format") {
            let subquery = SelectQuery::from("source_format")
                .select_raw("array_agg(format.label ORDER BY format.label) as val")
                .join(Join::on_columns("format", "format.id", "source_format.format"))
                .filter(Predicate::columns_eq("source_format.source", "source.id"));
            lateral_include(ctx, "format", subquery);
        }

        if ctx.includes("langvar") {
            let subquery = SelectQuery::from("source_langvar")
                .select_raw("array_agg(source_langvar.langvar ORDER BY source_langvar.langvar) as val")
                .filter(Predicate::columns_eq("source_langvar.source", "source.id"));
            lateral_include(ctx, "langvar", subquery);
        }

        if ctx.includes("langvar_attested") {
            let subquery = SelectQuery::from("denotationx")
                .select_raw(
                    "array_agg(DISTINCT denotationx.langvar ORDER BY denotationx.langvar) as val",
                )
                .filter(Predicate::columns_eq("denotationx.source", "source.id"));
            lateral_include(ctx, "langvar_attested", subquery);
        }

        if ctx.includes("denotation_count") {
            ctx.select_expr(
                "(select count(*) from denotationx where denotationx.source = source.id) as denotation_count",
            );
        }

        if ctx.includes("meaning_count") {
            ctx.select_expr(
                "(select count(*) from meaning where meaning.source = source.id) as meaning_count",
            );
        }

        if ctx.includes("usr") {
            let subquery = SelectQuery::from("source_meaning_editor")
                .select_raw("array_agg(usr.username ORDER BY usr.username) as val")
                .join(Join::on_columns("usr", "usr.id", "source_meaning_editor.usr"))
                .filter(Predicate::columns_eq("source_meaning_editor.source", "source.id"));
            lateral_include(ctx, "usr", subquery);
        }

        Ok(())
    }

    fn conditions(ctx: &mut QueryContext, _counting: bool) -> Result<usize, ApiError> {
        filter_param(ctx, "id", "source.id", matchers::id)?;
        filter_param(ctx, "grp", "source.grp", matchers::id)?;
        filter_param(ctx, "label", "source.label", matchers::txt_nfc)?;

        if let Some(values) = ctx.consume_array("langvar")? {
            let exists = correlated(
                "source_langvar as source_langvar2",
                "source_langvar2.source",
                "source.id",
            )
            .filter(Predicate::compare(
                "source_langvar2.langvar",
                matchers::id(&values, "langvar")?,
            ));
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        if let Some(values) = ctx.consume_array("uid")? {
            let exists = correlated(
                "source_langvar as source_langvar3",
                "source_langvar3.source",
                "source.id",
            )
            .filter(Predicate::compare(
                "source_langvar3.langvar",
                matchers::uid_langvar(&values, "uid")?,
            ));
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        // Sources attesting every listed expression.
        if let Some(values) = ctx.consume_array("expr")? {
            let exprs = dedup(values);
            let exists = correlated("denotationx as denotation", "denotation.source", "source.id")
                .filter(Predicate::compare(
                    "denotation.expr",
                    matchers::id(&exprs, "expr")?,
                ))
                .having(Predicate::Raw(SqlFragment::new(
                    "count(DISTINCT denotation.expr) >= ?",
                    vec![SqlValue::Int(exprs.len() as i64)],
                )));
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        // Sources with one meaning holding every listed expression.
        if let Some(values) = ctx.consume_array("trans_expr")? {
            let exprs = dedup(values);
            let exists = correlated("denotationx as denotation2", "denotation2.source", "source.id")
                .filter(Predicate::compare(
                    "denotation2.expr",
                    matchers::id(&exprs, "trans_expr")?,
                ))
                .group_by("denotation2.meaning")
                .having(Predicate::Raw(SqlFragment::new(
                    "count(*) >= ?",
                    vec![SqlValue::Int(exprs.len() as i64)],
                )));
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        if let Some(has_meanings) = ctx.consume_bool("meaning")? {
            let meanings = Box::new(correlated("meaning", "meaning.source", "source.id"));
            ctx.filter(if has_meanings {
                Predicate::Exists(meanings)
            } else {
                Predicate::NotExists(meanings)
            });
        }

        if let Some(values) = ctx.consume_array("usr")? {
            let exists = correlated(
                "source_meaning_editor as source_meaning_editor2",
                "source_meaning_editor2.source",
                "source.id",
            )
            .join(Join::on_columns(
                "usr as usr2",
                "usr2.id",
                "source_meaning_editor2.usr",
            ))
            .filter(Predicate::compare("usr2.username", matchers::txt(&values, "usr")?));
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        if let Some(values) = ctx.consume_array("format")? {
            let exists = correlated(
                "source_format as source_format2",
                "source_format2.source",
                "source.id",
            )
            .join(Join::on_columns(
                "format as format2",
                "format2.id",
                "source_format2.format",
            ))
            .filter(Predicate::compare("format2.label", matchers::txt(&values, "format")?));
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        // Source listings are unlimited and never require a search parameter.
        Ok(0)
    }

    /// Numeric id or source label.
    fn lookup(key: &str) -> Result<Predicate, ApiError> {
        Ok(if NUMERIC_ID.is_match(key) {
            Predicate::eq("source.id", SqlValue::Int(super::parse_id(key)?))
        } else {
            Predicate::eq("source.label", SqlValue::Text(key.to_string()))
        })
    }

    fn transform(row: &mut Value) {
        let Some(obj) = row.as_object_mut() else {
            return;
        };
        if let Some(license) = obj.get_mut("license") {
            *license = license.as_str().map(license_name).unwrap_or(Value::Null);
        }
        for key in ["denotation_count", "meaning_count"] {
            if let Some(count) = obj.get_mut(key) {
                as_number(count);
            }
        }
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    entity_routes::<Source>("/v2/source", "/v2/source/count", "/v2/source/{id}")
}
