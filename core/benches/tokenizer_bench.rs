use criterion::{criterion_group, criterion_main, Criterion};
use ocrsearch_core::tokenizer::tokenize;

const PAGE: &str = "DECRETO N°0451; Santiago, 12 de junio de 2023. VISTOS: lo dispuesto en la Ley \
N°18.695, Orgánica Constitucional de Municipalidades; CONSIDERANDO: que es necesario \
aprobar el pago de las obligaciones pendientes con los proveedores de la comuna. DECRETO: \
1.- Apruébase el pago. 2.- Impútese el gasto a la cuenta 215_22_08. ANÓTESE, COMUNÍQUESE Y ARCHÍVESE.";

fn bench_tokenize(c: &mut Criterion) {
    let text = PAGE.repeat(40);
    c.bench_function("tokenize_decree_page", |b| b.iter(|| tokenize(&text)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
