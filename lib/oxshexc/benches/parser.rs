use codspeed_criterion_compat::{
    BenchmarkId, Criterion, Throughput, criterion_group, criterion_main,
};
use oxshexc::{ShExCParser, ShExCTokenizer};
use std::fmt::Write;

/// A schema of `size` shapes, each with a few constraints, references, value sets and an inline shape.
fn generate_schema(size: usize) -> String {
    let mut schema = String::from(
        "PREFIX ex: <http://example.com/>\nPREFIX xsd: <http://www.w3.org/2001/XMLSchema#>\nstart = @ex:S0\n",
    );
    for i in 0..size {
        let next = (i + 1) % size;
        writeln!(
            schema,
            "ex:S{i} EXTRA a {{
    ex:name xsd:string ;
        ex:comment \"name of the shape {i}\"@en + ,
    ex:age LITERAL MININCLUSIVE 0 MAXINCLUSIVE 150 ? ,
    ex:next @ex:S{next} OR {{ ex:value . }} * ,
    ex:status (ex:active ex:inactive <http://example.com/status/>~ - ex:deleted) ,
    ( ex:code IRI PATTERN \"^http\" | ex:label xsd:string {{1,3}} )
}}"
        )
        .unwrap();
    }
    schema
}

fn parse_schema(c: &mut Criterion) {
    let mut group = c.benchmark_group("ShExC parsing");
    for size in [10, 100, 1_000] {
        let schema = generate_schema(size);
        group.throughput(Throughput::Bytes(schema.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", size), &schema, |b, schema| {
            b.iter(|| ShExCParser::new().parse(schema).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("tokenize", size), &schema, |b, schema| {
            b.iter(|| {
                ShExCTokenizer::new(schema)
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(parser, parse_schema);

criterion_main!(parser);
