use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use livegrid::*;

fn wide_table(size: u64) -> (Vec<Column>, ConstraintsData) {
    let mut columns = vec![Column::new(1u64, "id", "INTEGER", 0).primary_key()];
    for i in 2..=size {
        let db_type = match i % 4 {
            0 => "BOOLEAN",
            1 => "INTEGER",
            2 => "VARCHAR",
            _ => "DATE",
        };
        columns.push(Column::new(i, format!("col_{}", i), db_type, (i - 1) as usize));
    }

    let mut constraints = vec![Constraint::new(1, "pk", ConstraintKind::PrimaryKey, vec![ColumnId(1)])];
    for i in (3..=size).step_by(10) {
        constraints.push(Constraint::foreign_key(i, format!("fk_{}", i), ColumnId(i), TableId(100 + i)));
    }
    (columns, ConstraintsData::new(constraints))
}

fn bench_build_processed_columns(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_processed_columns");
    let abstract_types = AbstractTypeMap::postgres_defaults();

    for size in [10u64, 100, 1000].iter() {
        let (columns, constraints) = wide_table(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                build_processed_columns(
                    black_box(TableId(1)),
                    black_box(&columns),
                    black_box(&constraints),
                    &abstract_types,
                    PrimaryKeyDisplay::Enhanced,
                )
            });
        });
    }
    group.finish();
}

fn bench_processed_display_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("processed_display_order");
    let abstract_types = AbstractTypeMap::postgres_defaults();

    for size in [10u64, 100, 1000].iter() {
        let (columns, constraints) = wide_table(*size);
        let processed =
            build_processed_columns(TableId(1), &columns, &constraints, &abstract_types, PrimaryKeyDisplay::Plain);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(&processed).display_order());
        });
    }
    group.finish();
}

fn bench_strip_column_references(c: &mut Criterion) {
    let mut group = c.benchmark_group("strip_column_references");

    for size in [10u64, 100, 1000].iter() {
        let sorting = Sorting::from_entries((1..=*size).map(|i| (ColumnId(i), SortDirection::Ascending)));
        let filtering = (1..=*size).fold(Filtering::default(), |f, i| {
            f.with_entry(FilterEntry::new(ColumnId(i), FilterCondition::Equal, i as i64))
        });
        let removed: Vec<ColumnId> = (1..=*size).step_by(3).map(ColumnId).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let sorting = sorting.without_columns(black_box(&removed));
                let filtering = filtering.without_columns(black_box(&removed));
                (sorting, filtering)
            });
        });
    }
    group.finish();
}

fn bench_max_selectable_row_index(c: &mut Criterion) {
    let pagination = Pagination::new(50).with_page(3);
    c.bench_function("max_selectable_row_index", |b| {
        b.iter(|| {
            max_selectable_row_index(
                black_box(&pagination),
                black_box(120),
                black_box(20),
                black_box(2),
            )
        });
    });
}

fn bench_meta_serialize(c: &mut Criterion) {
    let meta = Meta::new(50);
    meta.set_sorting(Sorting::new().with(ColumnId(2), SortDirection::Descending));
    meta.set_grouping(Grouping::new(vec![GroupEntry::new(ColumnId(3))]));
    meta.set_filtering(Filtering::default().with_entry(FilterEntry::new(
        ColumnId(4),
        FilterCondition::Equal,
        true,
    )));

    c.bench_function("meta_serialize_roundtrip", |b| {
        b.iter(|| {
            let encoded = meta.serialize().unwrap();
            Meta::deserialize(black_box(&encoded)).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_build_processed_columns,
    bench_processed_display_order,
    bench_strip_column_references,
    bench_max_selectable_row_index,
    bench_meta_serialize,
);
criterion_main!(benches);
