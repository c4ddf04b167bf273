use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pug::{Options, Value};
use serde_json::json;

fn make_template(sections: usize) -> String {
    let mut src = String::from(
        "doctype html\nmixin item(name, i)\n  li(class={odd: i % 2 == 1})= name\nhtml\n  body\n",
    );
    for n in 0..sections {
        src.push_str(&format!(
            "    section#s{n}.block\n      h2 Section {n}\n      p Some #[em inline] text with #{{title}}.\n      ul\n        each name, i in names\n          +item(name, i)\n"
        ));
    }
    src
}

fn locals() -> Value {
    let names: Vec<String> = (0..20).map(|i| format!("name {i}")).collect();
    Value::from(json!({ "title": "<bench>", "names": names }))
}

fn bench_compile(c: &mut Criterion) {
    let small = make_template(5);
    let large = make_template(100);
    let options = Options::new();

    let mut g = c.benchmark_group("compile");
    g.bench_function("lex_small", |b| b.iter(|| pug::lexer::lex(black_box(&small), &[])));
    g.bench_function("compile_small", |b| b.iter(|| pug::compile(black_box(&small), &options)));
    g.bench_function("compile_large", |b| b.iter(|| pug::compile(black_box(&large), &options)));
    g.finish();
}

fn bench_render(c: &mut Criterion) {
    let locals = locals();
    let small = pug::compile(&make_template(5), &Options::new()).unwrap();
    let large = pug::compile(&make_template(100), &Options::new()).unwrap();
    let pretty = pug::compile(&make_template(5), &Options::new().with_pretty(true)).unwrap();

    let mut g = c.benchmark_group("render");
    g.bench_function("render_small", |b| b.iter(|| small.render(black_box(&locals))));
    g.bench_function("render_large", |b| b.iter(|| large.render(black_box(&locals))));
    g.bench_function("render_pretty", |b| b.iter(|| pretty.render(black_box(&locals))));
    g.finish();
}

criterion_group!(benches, bench_compile, bench_render);
criterion_main!(benches);
