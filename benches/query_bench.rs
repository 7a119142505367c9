#![allow(clippy::expect_used)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::fmt::Write;
use xmlquill::{Mode, NamespaceBindings, XmlDocument};

// ---------------------------------------------------------------------------
// Document generators
// ---------------------------------------------------------------------------

/// Generates a catalog with `count` books spread over a few genres.
fn make_catalog(count: usize) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<catalog>\n");
    let genres = ["fiction", "science", "history"];
    for i in 0..count {
        let _ = writeln!(
            xml,
            "  <book id=\"bk{i}\" genre=\"{}\"><title>Title {i}</title>\
             <author>Author {}</author><price>{}.50</price></book>",
            genres[i % genres.len()],
            i % 37,
            5 + i % 40
        );
    }
    xml.push_str("</catalog>\n");
    xml
}

/// Generates an HTML page with `count` list items, half of them unclosed.
fn make_html(count: usize) -> String {
    let mut html = String::from("<!DOCTYPE html><html><head><title>t</title></head><body><ul>");
    for i in 0..count {
        if i % 2 == 0 {
            let _ = write!(html, "<li class=even><a href=\"/p/{i}\">{i}</a></li>");
        } else {
            let _ = write!(html, "<li><a href=/p/{i}>{i}</a>");
        }
    }
    html.push_str("</ul></body></html>");
    html
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn bench_load_xml(c: &mut Criterion) {
    let xml = make_catalog(1000);
    c.bench_function("load_xml", |b| {
        b.iter(|| XmlDocument::parse(black_box(xml.as_bytes()), Mode::Xml, None).expect("parse failed"));
    });
}

fn bench_load_html(c: &mut Criterion) {
    let html = make_html(1000);
    c.bench_function("load_html", |b| {
        b.iter(|| XmlDocument::parse(black_box(html.as_bytes()), Mode::Html, None).expect("parse failed"));
    });
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn bench_query_simple(c: &mut Criterion) {
    let doc = XmlDocument::parse_xml(&make_catalog(1000)).expect("parse failed");
    let root = doc.root().expect("no root element");
    c.bench_function("query_simple", |b| {
        b.iter(|| root.children_with_xpath(black_box("//book/title")).expect("query failed"));
    });
}

fn bench_query_predicate(c: &mut Criterion) {
    let doc = XmlDocument::parse_xml(&make_catalog(1000)).expect("parse failed");
    let root = doc.root().expect("no root element");
    c.bench_function("query_predicate", |b| {
        b.iter(|| {
            root.children_with_xpath(black_box(
                "//book[@genre='fiction' and number(price) > 20]/title",
            ))
            .expect("query failed")
        });
    });
}

fn bench_query_uncached(c: &mut Criterion) {
    let xml = make_catalog(200);
    c.bench_function("query_uncached", |b| {
        b.iter_batched(
            || XmlDocument::parse_xml(&xml).expect("parse failed"),
            |doc| {
                let root = doc.root().expect("no root element");
                root.query_value(black_box("count(//book[@genre='history'])"))
                    .expect("query failed")
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_query_namespaced(c: &mut Criterion) {
    let xml = make_catalog(500).replace("<catalog>", "<catalog xmlns=\"urn:books\">");
    let doc = XmlDocument::parse_xml(&xml).expect("parse failed");
    let root = doc.root().expect("no root element");
    let ns = NamespaceBindings::new().with("b", "urn:books");
    c.bench_function("query_namespaced", |b| {
        b.iter(|| {
            root.children_with_xpath_ns(black_box("//b:book[b:price > 30]"), &ns)
                .expect("query failed")
        });
    });
}

// ---------------------------------------------------------------------------
// Iteration and mutation
// ---------------------------------------------------------------------------

fn bench_iterate_read(c: &mut Criterion) {
    let doc = XmlDocument::parse_xml(&make_catalog(1000)).expect("parse failed");
    let root = doc.root().expect("no root element");
    c.bench_function("iterate_read", |b| {
        b.iter(|| {
            let mut total = 0.0;
            root.iterate("book.price", |price| {
                total += price.text_as_double().unwrap_or_default();
            })
            .expect("iterate failed");
            black_box(total)
        });
    });
}

fn bench_iterate_remove(c: &mut Criterion) {
    let xml = make_catalog(500);
    c.bench_function("iterate_remove", |b| {
        b.iter_batched(
            || XmlDocument::parse_xml(&xml).expect("parse failed"),
            |doc| {
                let root = doc.root().expect("no root element");
                root.iterate("//book[@genre='science']", |book| {
                    let _ = book.remove();
                })
                .expect("iterate failed");
                doc
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(loading, bench_load_xml, bench_load_html);

criterion_group!(
    queries,
    bench_query_simple,
    bench_query_predicate,
    bench_query_uncached,
    bench_query_namespaced,
);

criterion_group!(iteration, bench_iterate_read, bench_iterate_remove);

criterion_main!(loading, queries, iteration);
