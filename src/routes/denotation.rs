use std::sync::Arc;

use lazy_static::lazy_static;

use super::{correlated, entity_routes, filter_param, lateral_include, Entity};
use crate::catalog::ColumnMap;
use crate::pagination::ListingOptions;
use crate::predicate::matchers;
use crate::query_builder::{Predicate, SelectQuery};
use crate::server::errors::ApiError;
use crate::server::pipeline::Route;
use crate::server::query_context::QueryContext;

const COLS: [&str; 4] = ["id", "expr", "meaning", "source"];

lazy_static! {
    static ref COLUMNS: ColumnMap = ColumnMap::build("denotation", &COLS, &[]);
}

pub struct Denotation;

impl Entity for Denotation {
    const NAME: &'static str = "denotation";
    const FROM: &'static str = "denotationx as denotation";
    const LABEL: &'static str = "denotation";
    const ARRAY_PARAMS: &'static [&'static str] =
        &["expr", "id", "langvar", "meaning", "source", "uid"];
    const LISTING: ListingOptions = ListingOptions {
        id_field: "id",
        table: "denotation",
        search_required: Some(
            "you must specify at least one of the \"denotation\", \"expr\", \"langvar\", \"meaning\", \"source\", or \"uid\" parameters",
        ),
        unlimited: false,
    };

    fn column_map() -> &'static ColumnMap {
        &COLUMNS
    }

    fn select(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.select_cols(&COLUMNS, &COLS);

        if ctx.includes("denotation_class") {
            let subquery = SelectQuery::from("denotation_class")
                .select_raw(
                    "array_agg(json_build_array(denotation_class.expr1, denotation_class.expr2) \
                     ORDER BY denotation_class.id) as val",
                )
                .filter(Predicate::columns_eq("denotation_class.denotation", "denotation.id"));
            lateral_include(ctx, "denotation_class", subquery);
        }

        if ctx.includes("denotation_prop") {
            let subquery = SelectQuery::from("denotation_prop")
                .select_raw(
                    "array_agg(json_build_array(denotation_prop.expr, denotation_prop.txt) \
                     ORDER BY denotation_prop.id) as val",
                )
                .filter(Predicate::columns_eq("denotation_prop.denotation", "denotation.id"));
            lateral_include(ctx, "denotation_prop", subquery);
        }

        Ok(())
    }

    fn conditions(ctx: &mut QueryContext, _counting: bool) -> Result<usize, ApiError> {
        let mut num_params = 0;

        let filters: [(&str, &str, super::Matcher); 6] = [
            ("id", "denotation.id", matchers::id),
            ("meaning", "denotation.meaning", matchers::id),
            ("expr", "denotation.expr", matchers::id),
            ("source", "denotation.source", matchers::id),
            ("langvar", "denotation.langvar", matchers::id),
            ("uid", "denotation.langvar", matchers::uid_langvar),
        ];
        for (name, column, matcher) in filters {
            num_params += filter_param(ctx, name, column, matcher)? as usize;
        }

        // Class and property filters narrow the rows without counting as a search.
        if let Some(values) = ctx.consume_array("denotation_class")? {
            let pairs = matchers::class_pairs(
                &values,
                "denotation_class.expr1",
                "denotation_class.expr2",
                "denotation_class",
            )?;
            let exists = correlated("denotation_class", "denotation_class.denotation", "denotation.id")
                .filter(pairs);
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        if let Some(values) = ctx.consume_array("denotation_prop")? {
            let pairs = matchers::prop_pairs(
                &values,
                "denotation_prop.expr",
                "denotation_prop.txt",
                "denotation_prop",
            )?;
            let exists = correlated("denotation_prop", "denotation_prop.denotation", "denotation.id")
                .filter(pairs);
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        Ok(num_params)
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    entity_routes::<Denotation>(
        "/v2/denotation",
        "/v2/denotation/count",
        "/v2/denotation/{id}",
    )
}
