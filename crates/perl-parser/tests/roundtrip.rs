//! parse → deparse → parse equality over the construct corpus.
//!
//! The S-expression form is the comparison key: spans and annotation
//! state are deliberately outside it, so two structurally equal trees
//! compare equal regardless of layout.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use perl_parser::Parser;
use pretty_assertions::assert_eq;

fn roundtrip(src: &str) {
    let first = Parser::new(src).parse().unwrap_or_else(|e| panic!("parse {src:?}: {e}"));
    let printed = perl_ast::deparse(&first);
    let second = Parser::new(&printed)
        .parse()
        .unwrap_or_else(|e| panic!("reparse of {printed:?} (from {src:?}): {e}"));
    assert_eq!(first.to_sexp(), second.to_sexp(), "source: {src} deparsed: {printed}");
}

#[test]
fn literals_and_operators() {
    for src in [
        "42;",
        "3.25;",
        "'single';",
        "\"double $x\";",
        "qw(a b c);",
        "1 + 2 * 3 - 4 / 5;",
        "2 ** 3 ** 2;",
        "'a' . 'b' x 3;",
        "1 <=> 2;",
        "'x' cmp 'y';",
        "7 % 3;",
        "1 < 2 && 3 > 2;",
        "$x || $y // $z;",
        "!$x;",
        "-$x;",
        "~5;",
        "1 .. 10;",
    ] {
        roundtrip(src);
    }
}

#[test]
fn variables_and_aggregates() {
    for src in [
        "$x;",
        "@list;",
        "%hash;",
        "$#items;",
        "$a[0];",
        "$h{key};",
        "$h{$k};",
        "@a[1, 2];",
        "@h{'x', 'y'};",
        "$r->[0];",
        "$r->{k};",
        "$r->[0]{k}[1];",
        "$$ref;",
        "@{$aref};",
        "${$h}{k};",
        "[1, 2, 3];",
        "{ a => 1 };",
        "\\$x;",
        "\\@a;",
        "\\&f;",
    ] {
        roundtrip(src);
    }
}

#[test]
fn declarations() {
    for src in [
        "my $x;",
        "my $x = 5;",
        "my ($a, $b) = (1, 2);",
        "my @a = (1, 2);",
        "my %h = (k => 'v');",
        "our $global = 1;",
        "local $x = 2;",
        "state $n = 0;",
    ] {
        roundtrip(src);
    }
}

#[test]
fn control_structures() {
    for src in [
        "if ($x) { 1; }",
        "if ($x) { 1; } else { 2; }",
        "if ($x) { 1; } elsif ($y) { 2; } else { 3; }",
        "unless ($x) { 1; }",
        "while ($x) { $x--; }",
        "until ($done) { work(); }",
        "for (my $i = 0; $i < 10; $i++) { print $i; }",
        "foreach my $e (@list) { print $e; }",
        "LOOP: while (1) { last LOOP; }",
        "for (1 .. 3) { next; }",
        "{ redo; }",
        "return 1 if $x;",
        "print $_ for 1 .. 3;",
        "$x++ while $x < 5;",
    ] {
        roundtrip(src);
    }
}

#[test]
fn subs_and_calls() {
    for src in [
        "sub f { return 42; }",
        "sub g { my $n = shift; $n * 2; }",
        "my $code = sub { 1 };",
        "f(1, 2);",
        "$code->(3);",
        "$obj->method(1);",
        "Class->new;",
        "goto &other;",
        "print 'x';",
        "print STDERR 'oops';",
        "sort { $a <=> $b } @xs;",
        "map { $_ * 2 } @xs;",
        "grep { $_ > 0 } @xs;",
        "join(',', @xs);",
    ] {
        roundtrip(src);
    }
}

#[test]
fn assignment_forms() {
    for src in [
        "$x = 1;",
        "$x += 2;",
        "$x .= 'tail';",
        "$x //= 'default';",
        "$x ||= 1;",
        "@a = (1, 2);",
        "%h = (a => 1);",
        "$h{k} = 'v';",
        "$a[0] = 9;",
        "$x++;",
        "--$y;",
    ] {
        roundtrip(src);
    }
}

#[test]
fn regex_forms() {
    for src in [
        "$x =~ m/abc/;",
        "$x =~ m/a(b)c/i;",
        "$x !~ m/d/;",
        "$x =~ s/a/b/g;",
        "$x =~ tr/a-z/A-Z/;",
        "m/topic/;",
    ] {
        roundtrip(src);
    }
}

#[test]
fn eval_and_blocks() {
    for src in [
        "eval { risky(); };",
        "my $r = eval { 1 };",
        "eval 'code';",
        "do { 1; 2; };",
        "{ local $x = 1; use_it(); }",
    ] {
        roundtrip(src);
    }
}

#[test]
fn statement_sequences() {
    roundtrip("my $s = 0; for (1 .. 10) { $s += $_; } print $s;");
    roundtrip("sub f { my $n = shift; return 1 if $n < 2; $n * f($n - 1); } print f(5);");
    roundtrip("my %h = (a => 1, b => 2); print join(',', map { \"$_=$h{$_}\" } sort keys %h);");
}
