use lexiquery::query_builder::{
    Comparison, Join, OrderByOrder, Predicate, SelectQuery, SqlFragment, SqlValue, ToSql,
};

fn nested() -> SelectQuery {
    let exists = SelectQuery::from("denotation")
        .select_raw("1")
        .filter(Predicate::columns_eq("denotation.expr", "expr.id"))
        .filter(Predicate::eq("denotation.source", SqlValue::Int(12)));

    SelectQuery::from("expr")
        .select_raw("expr.id")
        .join(Join::on_columns("langvar", "langvar.id", "expr.langvar"))
        .filter(Predicate::eq("expr.txt", SqlValue::Text("it's".to_string())))
        .filter(Predicate::Exists(Box::new(exists)))
        .filter(Predicate::compare(
            "langvar.lang_code",
            Comparison::AnyOf(SqlValue::TextArray(vec!["eng".into(), "deu".into()])),
        ))
        .order_by("expr.id", OrderByOrder::Asc)
        .limit(10)
}

#[test]
fn test_placeholders_number_through_subqueries() {
    let compiled = nested().compile();
    assert_eq!(
        compiled.sql,
        "select expr.id from expr inner join langvar on langvar.id = expr.langvar \
         where expr.txt = $1 and exists (select 1 from denotation where \
         denotation.expr = expr.id and denotation.source = $2) \
         and langvar.lang_code = any($3) order by expr.id asc limit 10"
    );
    assert_eq!(
        compiled.params,
        vec![
            SqlValue::Text("it's".to_string()),
            SqlValue::Int(12),
            SqlValue::TextArray(vec!["eng".into(), "deu".into()]),
        ]
    );
}

#[test]
fn test_debug_rendering_inlines_values() {
    assert_eq!(
        nested().to_sql(),
        "select expr.id from expr inner join langvar on langvar.id = expr.langvar \
         where expr.txt = E'it\\'s' and exists (select 1 from denotation where \
         denotation.expr = expr.id and denotation.source = 12) \
         and langvar.lang_code = any(ARRAY[E'eng',E'deu']::text[]) order by expr.id asc limit 10"
    );
}

#[test]
fn test_fragment_placeholders_and_untyped_values() {
    let query = SelectQuery::from("expr")
        .select_raw("expr.id")
        .filter(Predicate::Raw(SqlFragment::new(
            "expr.langvar = ? and expr.txt_degr = txt_degr(?)",
            vec![SqlValue::Int(1), SqlValue::Text("a".to_string())],
        )))
        .filter(Predicate::compare(
            "expr.id",
            Comparison::AtLeast(SqlFragment::new(
                "?",
                vec![SqlValue::Untyped("5".to_string())],
            )),
        ));
    let compiled = query.compile();
    assert_eq!(
        compiled.sql,
        "select expr.id from expr where expr.langvar = $1 and \
         expr.txt_degr = txt_degr($2) and expr.id >= E'5'"
    );
    assert_eq!(compiled.params.len(), 2);
}

#[test]
fn test_count_wrapper() {
    let inner = SelectQuery::from("meaning")
        .select_raw("meaning.id")
        .filter(Predicate::eq("meaning.source", SqlValue::Int(3)));
    let count = SelectQuery::count_of(inner).compile();
    assert_eq!(
        count.sql,
        "select count(*) as count from (select meaning.id from meaning \
         where meaning.source = $1) as s"
    );
}
