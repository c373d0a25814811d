//! Compile-and-run tests through the public emitter + engine API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use perl_codegen::{compile_program, EmitterConfig};
use perl_runtime::{Interp, RuntimeCode, RuntimeError};
use perl_vm::run_program;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn interp_with_capture() -> (Interp, SharedBuf, SharedBuf) {
    let out = SharedBuf::default();
    let err = SharedBuf::default();
    let mut interp = Interp::with_output(Box::new(out.clone()), Box::new(err.clone()));
    interp.eval_hook = Some(Rc::new(|src: &str| {
        let ast = perl_parser::Parser::new(src)
            .parse()
            .map_err(|e| format!("{e}"))?;
        let method = compile_program(&ast, src, "(eval)", &EmitterConfig::default())
            .map_err(|e| format!("{e}"))?;
        Ok(Rc::new(RuntimeCode::anon(method, Vec::new())))
    }));
    (interp, out, err)
}

fn run_with_config(src: &str, config: &EmitterConfig) -> Result<(String, String), RuntimeError> {
    let ast = perl_parser::Parser::new(src).parse().expect("parse failed");
    let method = compile_program(&ast, src, "-e", config).expect("compile failed");
    let (mut interp, out, err) = interp_with_capture();
    let result = run_program(&mut interp, &method);
    let stdout = String::from_utf8_lossy(&out.0.borrow()).into_owned();
    let stderr = String::from_utf8_lossy(&err.0.borrow()).into_owned();
    result.map(|()| (stdout, stderr))
}

fn run_ok(src: &str) -> String {
    match run_with_config(src, &EmitterConfig::default()) {
        Ok((stdout, _)) => stdout,
        Err(e) => panic!("runtime error for {src:?}: {e}"),
    }
}

// ===== end-to-end scenarios =====

#[test]
fn scenario_sum_loop() {
    assert_eq!(run_ok("my $s=0; for (1..10){$s+=$_} print $s"), "55");
}

#[test]
fn scenario_recursive_factorial() {
    assert_eq!(
        run_ok("sub f{ my $n=shift; return 1 if $n<2; $n*f($n-1) } print f(5)"),
        "120"
    );
}

#[test]
fn scenario_hash_map_sort_join() {
    assert_eq!(
        run_ok(r#"my %h=(a=>1,b=>2); print join(",", map {"$_=$h{$_}"} sort keys %h)"#),
        "a=1,b=2"
    );
}

#[test]
fn scenario_local_dynamic_scope() {
    assert_eq!(
        run_ok(r#"our $x="out"; sub show{print "$x\n"} { local $x="in"; show() } show()"#),
        "in\nout\n"
    );
}

#[test]
fn scenario_eval_catches_die() {
    assert_eq!(
        run_ok(r#"my $r=eval { die "boom\n" }; print "caught:$@""#),
        "caught:boom\n"
    );
}

#[test]
fn scenario_nested_loops_last() {
    assert_eq!(
        run_ok(r#"for my $i (1..3){ for my $j (1..3){ last if $j==2; print "$i$j "} } print ".""#),
        "11 21 31 ."
    );
}

// ===== value semantics =====

#[test]
fn string_and_numeric_ops() {
    assert_eq!(run_ok(r#"print "a" . "b" . (2 * 3)"#), "ab6");
    assert_eq!(run_ok("print 7 / 2"), "3.5");
    assert_eq!(run_ok("print 10 % 3, ' ', -7 % 3"), "1 2");
    assert_eq!(run_ok("print 2 ** 10"), "1024");
    assert_eq!(run_ok("print 'ab' x 3"), "ababab");
}

#[test]
fn string_auto_increment() {
    assert_eq!(run_ok("my $s = 'Az'; $s++; print $s"), "Ba");
    assert_eq!(run_ok("my $s = 'zz'; $s++; print $s"), "aaa");
    assert_eq!(run_ok("my $n = '9'; $n++; print $n"), "10");
}

#[test]
fn arrays_push_pop_negative_index() {
    assert_eq!(
        run_ok("my @a=(1,2,3); push @a, 4; print $a[-1], $a[0], scalar(@a)"),
        "414"
    );
    assert_eq!(run_ok("my @a=(1,2,3); print pop @a; print shift @a"), "31");
}

#[test]
fn hash_exists_delete() {
    assert_eq!(
        run_ok(r#"my %h=(x=>1); print exists $h{x} ? "y" : "n"; delete $h{x}; print exists $h{x} ? "y" : "n""#),
        "yn"
    );
}

#[test]
fn autovivification() {
    assert_eq!(
        run_ok(r#"my $x; $x->{a}[1] = 5; print ref($x), $x->{a}[1]"#),
        "HASH5"
    );
}

#[test]
fn references_and_aliasing() {
    assert_eq!(run_ok("my $x = 5; my $r = \\$x; $$r = 7; print $x"), "7");
    assert_eq!(
        run_ok("my @a=(1,2); my $r=\\@a; push @$r, 3; print scalar(@a)"),
        "3"
    );
    assert_eq!(run_ok("my $r = [1, [2, 3]]; print $r->[1][0]"), "2");
    assert_eq!(run_ok("my $h = { k => { n => 9 } }; print $h->{k}{n}"), "9");
}

#[test]
fn foreach_aliases_elements() {
    assert_eq!(
        run_ok("my @a=(1,2,3); for my $x (@a) { $x *= 2 } print \"@a\""),
        "2 4 6"
    );
}

#[test]
fn ternary_ranges_and_wantarray() {
    assert_eq!(run_ok("print 1 ? 'y' : 'n'"), "y");
    assert_eq!(run_ok("my @r = (3..6); print \"@r\""), "3 4 5 6");
    assert_eq!(
        run_ok("sub c { wantarray ? 'list' : 'scalar' } my @l = c(); my $s = c(); print \"@l $s\""),
        "list scalar"
    );
}

#[test]
fn closures_capture_cells() {
    assert_eq!(
        run_ok("my $n = 0; my $inc = sub { $n++ }; $inc->(); $inc->(); print $n"),
        "2"
    );
    assert_eq!(
        run_ok(
            "sub counter { my $c = 0; return sub { ++$c } } my $a = counter(); \
             $a->(); print $a->(); my $b = counter(); print $b->()"
        ),
        "21"
    );
}

#[test]
fn list_assignment_and_swap() {
    assert_eq!(run_ok("my ($a, $b) = (1, 2); ($a, $b) = ($b, $a); print $a, $b"), "21");
    assert_eq!(run_ok("my ($x, @rest) = (1, 2, 3); print $x, scalar(@rest)"), "12");
}

#[test]
fn string_interpolation_forms() {
    assert_eq!(run_ok(r#"my @a=(1,2); my %h=(k=>'v'); my $i=1; print "$a[0] $h{k} $a[$i]""#), "1 v 2");
    assert_eq!(run_ok(r#"my @a=(7,8); print "[@a]""#), "[7 8]");
}

// ===== regex =====

#[test]
fn match_and_captures() {
    assert_eq!(
        run_ok(r#"if ("key=42" =~ /(\w+)=(\d+)/) { print "$1:$2" }"#),
        "key:42"
    );
    assert_eq!(run_ok(r#"my $s="aXbXc"; my $n = () = $s =~ /X/g; print "ok" if $s =~ /b/; "#), "ok");
}

#[test]
fn substitution() {
    assert_eq!(run_ok(r#"my $s = "foo boo"; my $n = ($s =~ s/oo/00/g); print "$s $n""#), "f00 b00 2");
    assert_eq!(run_ok(r#"my $s = "abc"; $s =~ s/(a)(b)/$2$1/; print $s"#), "bac");
}

#[test]
fn transliteration() {
    assert_eq!(run_ok(r#"my $s = "hello"; my $n = ($s =~ tr/a-z/A-Z/); print "$s $n""#), "HELLO 5");
}

#[test]
fn capture_state_restored_after_sub_call() {
    assert_eq!(
        run_ok(r#""a1" =~ /([a-z])/; sub f { "x9" =~ /(\d)/ } f(); print $1"#),
        "a"
    );
}

// ===== control flow =====

#[test]
fn labels_and_nested_control() {
    assert_eq!(
        run_ok(
            "OUTER: for my $i (1..3) { for my $j (1..3) { next OUTER if $j == 2; \
             print \"$i$j \" } } print 'done'"
        ),
        "11 21 31 done"
    );
    assert_eq!(
        run_ok("my $n = 0; OUT: while (1) { $n++; last OUT if $n > 2; } print $n"),
        "3"
    );
}

#[test]
fn loop_control_through_sub_boundary() {
    // `last` thrown from a nested call reaches the owning loop as a
    // marker through the control-flow registry.
    assert_eq!(
        run_ok(
            "sub stop { last } my $n = 0; for (1..5) { $n++; stop() if $_ == 3 } print $n"
        ),
        "3"
    );
}

#[test]
fn unmatched_label_is_an_error() {
    let err = run_with_config("last NOWHERE;", &EmitterConfig::default()).unwrap_err();
    assert!(err.to_string().contains("Label not found"));
}

#[test]
fn tail_call_goto() {
    assert_eq!(
        run_ok("sub a { goto &b } sub b { print \"b:@_\" } a(1, 2)"),
        "b:1 2"
    );
}

#[test]
fn tail_call_does_not_grow_stack() {
    // 5000 self tail-calls would overflow the call depth limit without
    // the trampoline.
    assert_eq!(
        run_ok(
            "our $n = 0; sub spin { $n++; return $n if $n >= 5000; goto &spin } \
             my @r = spin(); print $r[0]"
        ),
        "5000"
    );
}

#[test]
fn do_block_and_unless() {
    assert_eq!(run_ok("my $x = do { 1; 2; 3 }; print $x"), "3");
    assert_eq!(run_ok("print 'ok' unless 0"), "ok");
    assert_eq!(run_ok("my $i = 5; print 'big' if $i > 3"), "big");
}

#[test]
fn until_and_continue_blocks() {
    assert_eq!(
        run_ok("my $i = 0; my $c = 0; until ($i >= 3) { $i++ } continue { $c++ } print \"$i$c\""),
        "33"
    );
}

#[test]
fn redo_reruns_body() {
    assert_eq!(
        run_ok(
            "my $tries = 0; for my $i (1..2) { $tries++; if ($tries == 1 && $i == 1) { redo } } \
             print $tries"
        ),
        "3"
    );
}

#[test]
fn bare_block_is_loop_once() {
    assert_eq!(run_ok("{ print 'in'; last; print 'skipped'; } print '.'"), "in.");
}

// ===== dynamic scope =====

#[test]
fn local_restores_on_all_paths() {
    assert_eq!(
        run_ok(
            r#"our $v = 1; sub get { $v } sub f { local $v = 2; die "x\n" } eval { f() }; print get()"#
        ),
        "1"
    );
    assert_eq!(
        run_ok("our $v = 'a'; for (1..2) { local $v = 'b'; last } print $v"),
        "a"
    );
}

#[test]
fn local_hash_element() {
    assert_eq!(
        run_ok("our %h = (k => 1); { local $h{k} = 2; print $h{k} } print $h{k}"),
        "21"
    );
}

// ===== eval =====

#[test]
fn eval_string_compiles_and_runs() {
    assert_eq!(run_ok("my $r = eval '2 + 3'; print $r"), "5");
    assert_eq!(run_ok(r#"eval 'die "bad\n"'; print "got:$@""#), "got:bad\n");
}

#[test]
fn nested_eval() {
    assert_eq!(
        run_ok(r#"eval { eval { die "inner\n" }; print "1:$@"; die "outer\n" }; print "2:$@""#),
        "1:inner\n2:outer\n"
    );
}

#[test]
fn die_with_object_preserved() {
    assert_eq!(
        run_ok(r#"eval { die { code => 42 } }; print ref($@), $@->{code}"#),
        "HASH42"
    );
}

// ===== OO =====

#[test]
fn bless_and_method_dispatch() {
    assert_eq!(
        run_ok(
            "package Counter; sub new { my ($class, $n) = @_; bless { n => $n }, $class } \
             sub bump { my $self = shift; $self->{n}++; $self->{n} } \
             package main; my $c = Counter->new(5); $c->bump; print $c->bump"
        ),
        "7"
    );
}

#[test]
fn inheritance_via_isa() {
    assert_eq!(
        run_ok(
            "package Base; sub new { bless {}, shift } sub hello { 'hi' } \
             package Derived; our @ISA = ('Base'); \
             package main; my $d = Derived->new; print $d->hello"
        ),
        "hi"
    );
}

// ===== builtins =====

#[test]
fn sprintf_and_printf() {
    assert_eq!(run_ok("print sprintf('%05.1f|%s', 3.14, 'x')"), "003.1|x");
    assert_eq!(run_ok("printf '%d-%d', 1, 2"), "1-2");
}

#[test]
fn split_forms() {
    assert_eq!(run_ok("my @p = split /,/, 'a,b,c'; print scalar(@p), $p[1]"), "3b");
    assert_eq!(run_ok("my @w = split ' ', '  x  y z '; print join('|', @w)"), "x|y|z");
}

#[test]
fn grep_and_reverse() {
    assert_eq!(run_ok("print join(',', grep { $_ % 2 } 1..6)"), "1,3,5");
    assert_eq!(run_ok("print join('', reverse(1..4))"), "4321");
    assert_eq!(run_ok("print scalar reverse('abc')"), "cba");
}

#[test]
fn sort_with_comparator() {
    assert_eq!(run_ok("print join(',', sort { $a <=> $b } 10, 2, 33, 4)"), "2,4,10,33");
    assert_eq!(run_ok("print join(',', sort qw(pear apple fig))"), "apple,fig,pear");
}

#[test]
fn substr_index_case() {
    assert_eq!(run_ok("print substr('hello world', 6, 5)"), "world");
    assert_eq!(run_ok("print substr('hello', -3, 2)"), "ll");
    assert_eq!(run_ok("print index('hello', 'l'), rindex('hello', 'l')"), "23");
    assert_eq!(run_ok("print uc('ab'), lcfirst('CD'), ucfirst('ef')"), "ABcDEf");
}

#[test]
fn chomp_chop_chr_ord() {
    assert_eq!(run_ok(r#"my $s = "line\n"; chomp $s; print "[$s]""#), "[line]");
    assert_eq!(run_ok("print chr(104), ord('h')"), "h104");
}

#[test]
fn each_iterates_in_order() {
    assert_eq!(
        run_ok(
            "my %h = (a => 1, b => 2); while (my ($k, $v) = each %h) { print \"$k$v\" }"
        ),
        "a1b2"
    );
}

#[test]
fn state_variables_persist() {
    assert_eq!(
        run_ok("sub tick { state $n = 0; ++$n } tick(); tick(); print tick()"),
        "3"
    );
}

// ===== backends =====

#[test]
fn listed_backend_matches_packed() {
    let src = "my $s = 0; for my $i (1..10) { $s += $i * $i } print $s";
    let packed = run_with_config(src, &EmitterConfig::default()).unwrap().0;
    let listed = run_with_config(
        src,
        &EmitterConfig { force_listed: true, ..EmitterConfig::default() },
    )
    .unwrap()
    .0;
    assert_eq!(packed, "385");
    assert_eq!(packed, listed);
}

#[test]
fn tiny_limit_still_runs_via_fallback() {
    let src = "my $t = 0; while ($t < 40) { $t += 1; $t += 1; $t += 2; } print $t";
    let out = run_with_config(
        src,
        &EmitterConfig { max_method_bytes: 64, ..EmitterConfig::default() },
    )
    .unwrap()
    .0;
    assert_eq!(out, "40");
}

#[test]
fn stack_overflow_reported() {
    let err = run_with_config("sub f { f() } f()", &EmitterConfig::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::StackOverflow));
}
