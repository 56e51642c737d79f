use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use webreactor::http::{parse_request, DEFAULT_MAX_LINE_LEN};

const REQ_SHORT: &[u8] = b"GET / HTTP/1.1\r\nHost: www.example.org\r\n\r\n";

const REQ_MED: &[u8] = b"\
GET /index.html HTTP/1.1\r\n\
Host: www.example.org\r\n\
Accept: */*\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\r\n";

const REQ_LONG: &[u8] = b"\
GET /static/css/app.bundle.min.css HTTP/1.1\r\n\
Host: assets.example.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\
Accept: text/css,*/*;q=0.1\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Referer: https://example.com/\r\n\
DNT: 1\r\n\
Connection: keep-alive\r\n\
Cookie: session=abcdefghijklmnopqrstuvwxyz0123456789; theme=dark; lang=en\r\n\
Sec-Fetch-Dest: style\r\n\
Sec-Fetch-Mode: no-cors\r\n\
Sec-Fetch-Site: same-origin\r\n\
Cache-Control: no-cache\r\n\r\n";

const TARGETS: [&[u8]; 3] = [REQ_SHORT, REQ_MED, REQ_LONG];

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_request");
    for target in TARGETS {
        group.throughput(Throughput::Bytes(target.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("framing", target.len() as u64),
            black_box(&target),
            |b, i| {
                b.iter(|| parse_request(i, DEFAULT_MAX_LINE_LEN));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
