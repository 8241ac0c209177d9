// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the host tensor primitives on the runtime's hot paths.

use criterion::{criterion_group, criterion_main, Criterion};
use tensor_host::{ops, unpack, DType, Shape, Tensor};

fn bench_to_f32(c: &mut Criterion) {
    let n = 1 << 20;
    let vals: Vec<half::f16> = (0..n).map(|i| half::f16::from_f32(i as f32)).collect();
    let src = Tensor::from_elems(Shape::vector(n), &vals).unwrap();
    let dst = Tensor::zeros(Shape::vector(n), DType::F32);

    c.bench_function("to_f32_f16_1m", |b| {
        b.iter(|| ops::to_f32(&src, &dst).unwrap());
    });
}

fn bench_transpose_i4(c: &mut Criterion) {
    let t = Tensor::zeros(Shape::new(vec![64, 64, 64]), DType::I4);

    c.bench_function("transpose_i4_64cube", |b| {
        b.iter(|| ops::transpose(&t).unwrap());
    });
}

fn bench_concat_axis2(c: &mut Criterion) {
    let parts: Vec<Tensor> = (0..4)
        .map(|_| Tensor::zeros(Shape::new(vec![1, 256, 512]), DType::F32))
        .collect();

    c.bench_function("concat_axis2_f32", |b| {
        b.iter(|| ops::concat(&parts, 2).unwrap());
    });
}

fn bench_unpack2_i4(c: &mut Criterion) {
    let elems = 1 << 18;
    let group = 64;
    let from = Tensor::zeros(Shape::matrix(elems / group, group), DType::I4);
    let zerop = Tensor::zeros(Shape::matrix(elems / group, 1), DType::F32);
    let scale = Tensor::from_f32(
        Shape::matrix(elems / group, 1),
        &vec![0.5; elems / group],
    )
    .unwrap();
    let to = Tensor::zeros(Shape::matrix(elems / group, group), DType::F16);

    c.bench_function("unpack2_i4_256k", |b| {
        b.iter(|| unpack::unpack2(&from, &zerop, &scale, &to).unwrap());
    });
}

criterion_group!(
    benches,
    bench_to_f32,
    bench_transpose_i4,
    bench_concat_axis2,
    bench_unpack2_i4
);
criterion_main!(benches);
