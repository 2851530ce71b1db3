use serde_json::json;
use std::sync::Arc;
use tinytpl::template::codegen::Instr;
use tinytpl::template::expr::Expr;
use tinytpl::{
    CompileError, Context, Delimiters, FilterTable, GrammarOverrides, RenderError, TagOutput,
    TagTable, Value, add_filter, add_tag, compile, compile_with,
};

fn ctx(value: serde_json::Value) -> Context {
    match value {
        serde_json::Value::Object(map) => Context::from(map),
        other => panic!("context must be an object, got {other}"),
    }
}

fn render(src: &str, context: serde_json::Value) -> String {
    compile(src).unwrap().render(&mut ctx(context)).unwrap()
}

#[test]
fn literal_only_templates_render_unchanged() {
    for src in ["", "plain", "isn't {\na }?", "braces } { %} #}"] {
        assert_eq!(render(src, json!({"x": 1})), src);
        assert_eq!(render(src, json!({})), src);
    }
}

#[test]
fn basic_interpolation() {
    assert_eq!(render("This is a {{ test }}!", json!({"test": "tester"})), "This is a tester!");
}

#[test]
fn dotted_access() {
    assert_eq!(
        render("{{ test.thing }}, {{ test.thing }}", json!({"test": {"thing": "tester"}})),
        "tester, tester"
    );
}

#[test]
fn literal_with_filter() {
    assert_eq!(render(r#"This is a {{ "testing"|upper }}"#, json!({})), "This is a TESTING");
}

#[test]
fn filter_arguments() {
    assert_eq!(render(r#"This is a {{ test|add:"123" }}"#, json!({"test": "tester"})), "This is a tester123");
    assert_eq!(
        render(
            r#"You have {{ count1 }} cherr{{ count1|pluralize:"ies,y" }} and {{ count2 }} apple{{ count2|pluralize:"s," }}."#,
            json!({"count1": 3, "count2": 1})
        ),
        "You have 3 cherries and 1 apple."
    );
}

#[test]
fn html_escaping_and_safe() {
    assert_eq!(
        render("Testing {{ test }} testing {{ test|safe }}", json!({"test": "<script>&copy;</script>"})),
        "Testing &lt;script&gt;&amp;copy;&lt;/script&gt; testing <script>&copy;</script>"
    );
}

#[test]
fn missing_variables_render_empty() {
    assert_eq!(render("[{{ nope }}][{{ a.b.c }}]", json!({"a": 1})), "[][]");
    assert_eq!(render(r#"{{ nope|default:"fallback" }}"#, json!({})), "fallback");
}

#[test]
fn filters_apply_left_to_right_with_custom_vocabulary() {
    let mut filters = FilterTable::new();
    add_filter(&mut filters, "a", |_, _| Ok(Value::from(vec!["a", "b", "correct", "c"])));
    add_filter(&mut filters, "b", |s, a| {
        let index = a.and_then(|a| a.as_f64()).unwrap_or(0.0);
        Ok(s.get_attr(&(index as usize).to_string()))
    });
    add_filter(&mut filters, "caps", |s, _| Ok(Value::Str(s.to_string().to_uppercase())));
    add_filter(&mut filters, "index_of_s", |s, _| {
        Ok(s.to_string().find('S').map_or(Value::Int(-1), |i| Value::Int(i as i64)))
    });

    let mut tags = TagTable::new();
    add_tag(&mut tags, "lol", |rest, c| {
        let inner = c.expr(rest);
        Ok(TagOutput::Inline(vec![Instr::Print(Expr::Filter {
            name: "index_of_s".into(),
            input: Box::new(inner),
            arg: None,
        })]))
    });

    let overrides = GrammarOverrides {
        tags: Some(tags),
        filters: Some(filters),
        delimiters: None,
    };
    let t = compile_with(r#"This is a {{ test|a|b:2|caps }} {% lol "ThIs iS a TEst!"|caps %}"#, &overrides)
        .unwrap();
    assert_eq!(t.render(&mut ctx(json!({"test": "tester"}))).unwrap(), "This is a CORRECT 3");

    // 整体替换：内置标签不再可用
    assert!(matches!(
        compile_with("{% if x %}{% endif %}", &overrides),
        Err(CompileError::UnknownTag { .. })
    ));
}

#[test]
fn unknown_filter_fails_at_render_time() {
    let t = compile("{{ x|nonexistent }}").unwrap();
    let err = t.render(&mut Context::new()).unwrap_err();
    assert_eq!(err, RenderError::UnknownFilter("nonexistent".into()));
}

#[test]
fn conditionals() {
    let src = r#"{% if test == "tester" %}yes{% else %}no{% endif %}"#;
    assert_eq!(render(src, json!({"test": "tester"})), "yes");
    assert_eq!(render(src, json!({"test": "4tester"})), "no");
    assert_eq!(
        render(r#"{% if test == "TeStEr" %}something{% endif %} else"#, json!({"test": "tester"})),
        " else"
    );
}

#[test]
fn elif_chain_first_true_wins() {
    let src = concat!(
        r#"{% if test == "tester" %}wrong1"#,
        r#"{% elif test == "tester2"  %}wrong2"#,
        r#"{% elif test == "tester3"  %}correct"#,
        r#"{% elif test|length == 7 %}late{% endif %} else"#,
    );
    assert_eq!(render(src, json!({"test": "tester3"})), "correct else");
    assert_eq!(render(src, json!({"test": "zzzzzzz"})), "late else");
}

#[test]
fn nested_and_filtered_conditions() {
    assert_eq!(
        render(
            r#"{% if test == "tester" %}{% if test == "tester" %}corr{% endif %}ect{% endif %} else"#,
            json!({"test": "tester"})
        ),
        "correct else"
    );
    assert_eq!(
        render(r#"{% if test|upper == "TESTER" %}correct{% endif %}"#, json!({"test": "teSteR"})),
        "correct"
    );
}

#[test]
fn comparison_operators() {
    let src = concat!(
        r#"{% if test == "tester" %}0{% endif %}"#,
        r#"{% if test != "tester" %}a{% endif %}"#,
        r#"{% if test is "tester" %}1{% endif %}"#,
        r#"{% if test is not "tester" %}b{% endif %}"#,
        r#"{% if test in "tester" %}2{% endif %}"#,
        r#"{% if test not in "tester" %}c{% endif %}"#,
        r#"{% if "e" in "tester" %}3{% endif %}"#,
        r#"{% if "b" in lst %}4{% endif %}"#,
        r#"{% if "c" in lst %}d{% endif %}"#,
        r#"{% if "three" in dict %}5{% endif %}"#,
        r#"{% if 3 == dict.three %}6{% endif %}"#,
        r#"{% if 3 > dict.three %}e{% endif %}"#,
        r#"{% if 3 < dict.three %}f{% endif %}"#,
        r#"{% if 3 != dict.three %}g{% endif %}"#,
        r#"{% if 3 <= dict.three %}7{% endif %}"#,
        r#"{% if 3 >= dict.three %}8{% endif %}"#,
        r#"{% if 4 > dict.three %}9{% endif %}"#,
        r#"{% if 4 >= dict.three %}0{% endif %}"#,
        r#"{% if 4 <= dict.three %}h{% endif %}"#,
        r#"{% if 4 < dict.three %}i{% endif %}"#,
        r#"{% if 4 < dict.five %}1{% endif %}"#,
    );
    assert_eq!(
        render(src, json!({"test": "tester", "lst": ["a", "b"], "dict": {"three": 3, "five": 5}})),
        "012345678901"
    );
}

#[test]
fn unary_conditions() {
    let src = concat!(
        "{% if not doesnotexist %}0{% endif %}",
        "{% if not exists %}a{% endif %}",
        "{% if not isfalse %}1{% endif %}",
        "{% if doesnotexist %}b{% endif %}",
        "{% if exists %}2{% endif %}",
        "{% if isfalse %}c{% endif %}",
    );
    assert_eq!(render(src, json!({"exists": true, "isfalse": false})), "012");
}

#[test]
fn reserved_words_inside_quotes() {
    let src = concat!(
        r#"{% if "is not" != "not in" %}0{% endif %}"#,
        r#"{% if "==" == "==" %}3{% endif %}"#,
        r#"{% if " is not " != "not in" %}4{% endif %}"#,
    );
    assert_eq!(render(src, json!({"not": "is not"})), "034");
}

#[test]
fn for_loops() {
    let digits = json!({"test": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]});
    assert_eq!(render("{% for num in test %}{{ num }}{% endfor %}", digits.clone()), "0123456789");
    assert_eq!(
        render("{% for n in test %}{% for num in test  %}{{ num }}{% endfor %}{% endfor %}", digits.clone()),
        "0123456789".repeat(10)
    );
    assert_eq!(
        render("{% for num in test|first %}{{ num }}{% endfor %}", json!({"test": [[7, 8], 9]})),
        "78"
    );
    assert_eq!(
        render("{% for num in test %}{% if num > 4 %}{{ num }}{% else %}a{% endif %}{% endfor %}", digits),
        "aaaaa56789"
    );
}

#[test]
fn for_loop_over_objects_and_mappings() {
    assert_eq!(
        render(
            r#"{% for obj in test %}{{ obj.a|upper }}{% if obj.a|upper == "C" %}lol{% endif %}{% endfor %}"#,
            json!({"test": [{"a": "a"}, {"a": "b"}, {"a": "c"}]})
        ),
        "ABClol"
    );
    assert_eq!(
        render(
            "{% for k, v in m %}{{ k }}={{ v }};{% endfor %}",
            json!({"m": {"a": 1, "b": 2}})
        ),
        "a=1;b=2;"
    );
    assert_eq!(
        render("{% for i,v in l %}{{ i }}{{ v }}{% endfor %}", json!({"l": ["x", "y"]})),
        "0x1y"
    );
}

#[test]
fn for_empty_renders_exactly_one_branch() {
    let src = "{% for num in test %}{{ num }}{% empty %}nothing here{% endfor %}";
    assert_eq!(render(src, json!({"test": []})), "nothing here");
    assert_eq!(render(src, json!({"test": ["a", "b", "c"]})), "abc");
    assert_eq!(render(src, json!({})), "nothing here");
    assert_eq!(
        render(
            "{% for num in test1 %}a{% empty %}w{% endfor %}{% for num in test2 %}{% empty %}nothing here{% endfor %}",
            json!({"test1": ["a"], "test2": []})
        ),
        "anothing here"
    );
}

#[test]
fn nested_for_empty_is_independent_per_level() {
    let src = "{% for arr in test %}{% for num in arr  %}{{ num }}{% empty %}e{% endfor %}{% empty %}w{% endfor %}";
    assert_eq!(render(src, json!({"test": [[], [1, 2, 3], [], ["a", "b"]]})), "e123eab");
    assert_eq!(render(src, json!({"test": []})), "w");
}

#[test]
fn concurrent_renders_do_not_share_loop_flags() {
    let t = Arc::new(
        compile("{% for arr in test %}{% for num in arr %}{{ num }}{% empty %}e{% endfor %}{% empty %}w{% endfor %}")
            .unwrap(),
    );
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = Arc::clone(&t);
                s.spawn(move || {
                    let data = if i % 2 == 0 {
                        json!({"test": [[], [1, 2, 3], [], ["a", "b"]]})
                    } else {
                        json!({"test": []})
                    };
                    (i, t.render(&mut ctx(data)).unwrap())
                })
            })
            .collect();
        for h in handles {
            let (i, out) = h.join().unwrap();
            assert_eq!(out, if i % 2 == 0 { "e123eab" } else { "w" });
        }
    });
}

#[test]
fn empty_outside_for_is_rejected() {
    assert!(matches!(compile("{% empty %}"), Err(CompileError::InvalidTag { .. })));
    assert!(matches!(
        compile("{% if x %}{% empty %}{% endif %}"),
        Err(CompileError::InvalidTag { .. })
    ));
}

#[test]
fn cycle_restarts_with_each_fresh_context() {
    let t = compile(r#"{% for n in l %}{% cycle "a" "b" "c" %} {% endfor %}"#).unwrap();
    let data = json!({"l": [1, 2, 3, 4, 5]});
    assert_eq!(t.render(&mut ctx(data.clone())).unwrap(), "a b c a b ");
    assert_eq!(t.render(&mut ctx(data)).unwrap(), "a b c a b ");
}

#[test]
fn distinct_cycle_tags_keep_separate_counters() {
    let t = compile(r#"{% for n in l %}{% cycle "x" "y" %}{% cycle 1 2 3 %}{% endfor %}"#).unwrap();
    let mut c = ctx(json!({"l": [0, 0, 0, 0]}));
    assert_eq!(t.render(&mut c).unwrap(), "x1y2x3y1");
    assert!(c.contains_key("cyclevar_0"));
    assert!(c.contains_key("cyclevar_1"));
}

#[test]
fn cycle_values_may_be_variables() {
    let t = compile("{% for n in l %}{% cycle odd even %}{% endfor %}").unwrap();
    let out = t.render(&mut ctx(json!({"l": [1, 2, 3], "odd": "<o>", "even": "e"}))).unwrap();
    assert_eq!(out, "&lt;o&gt;e&lt;o&gt;");
    assert_eq!(t.referenced_variables(), ["l", "odd", "even"]);
}

#[test]
fn comment_block_is_inert_but_still_compiled() {
    let t = compile("a{% comment %}{{ x }}{% if y %}z{% endif %}{% endcomment %}b").unwrap();
    assert_eq!(t.render(&mut ctx(json!({"x": 1, "y": true}))).unwrap(), "ab");
    assert_eq!(t.referenced_variables(), ["x", "y"]);
    assert!(compile("{% comment %}{% bogus %}{% endcomment %}").is_err());
    assert_eq!(render("a{# {% if %} #}b", json!({})), "ab");
}

#[test]
fn make_guid_assigns_compile_time_ids() {
    let t1 = compile("{% make_guid %}{{ guid }}|{% make_guid other %}{{ other }}").unwrap();
    let t2 = compile("{% make_guid %}{{ guid }}").unwrap();
    let first = t1.render(&mut Context::new()).unwrap();
    let again = t1.render(&mut Context::new()).unwrap();
    assert_eq!(first, again);

    let ids: Vec<i64> = first.split('|').map(|s| s.parse().unwrap()).collect();
    let id2: i64 = t2.render(&mut Context::new()).unwrap().parse().unwrap();
    assert!(ids[0] >= 1000);
    assert!(ids[1] > ids[0]);
    assert!(id2 > ids[1]);
}

#[test]
fn native_calls_from_custom_tags() {
    let mut tags = tinytpl::default_grammar().tags.clone();
    add_tag(&mut tags, "stamp", |rest, _c| {
        let label = rest.to_string();
        Ok(TagOutput::Inline(vec![Instr::Call(Arc::new(
            move |ctx: &mut Context, out: &mut String| -> Result<(), RenderError> {
                ctx.insert("stamped", true);
                out.push_str(&format!("[{label}]"));
                Ok(())
            },
        ))]))
    });
    let overrides = GrammarOverrides {
        tags: Some(tags),
        ..Default::default()
    };
    let t = compile_with("{% stamp here %}{% if stamped %}!{% endif %}", &overrides).unwrap();
    assert_eq!(t.render(&mut Context::new()).unwrap(), "[here]!");
}

#[test]
fn native_call_failures_abort_the_render() {
    let mut tags = TagTable::new();
    add_tag(&mut tags, "fail", |rest, _c| {
        let reason = rest.to_string();
        Ok(TagOutput::Inline(vec![Instr::Call(Arc::new(
            move |_: &mut Context, _: &mut String| -> Result<(), RenderError> {
                Err(RenderError::Native(reason.clone()))
            },
        ))]))
    });
    let overrides = GrammarOverrides {
        tags: Some(tags),
        ..Default::default()
    };
    let t = compile_with("before{% fail quota exceeded %}after", &overrides).unwrap();
    let err = t.render(&mut Context::new()).unwrap_err();
    assert_eq!(err, RenderError::Native("quota exceeded".into()));
    assert_eq!(err.to_string(), "quota exceeded");
}

#[test]
fn oversized_integer_literal_is_not_a_variable() {
    let t = compile("[{{ 99999999999999999999 }}]").unwrap();
    assert!(t.referenced_variables().is_empty());
    assert_eq!(t.render(&mut Context::new()).unwrap(), "[100000000000000000000]");
}

#[test]
fn empty_expression_marker_is_plain_text() {
    let t = compile("a{{}}b{{ }}c").unwrap();
    assert!(t.referenced_variables().is_empty());
    assert_eq!(t.render(&mut Context::new()).unwrap(), "a{{}}bc");
}

#[test]
fn custom_delimiters() {
    let overrides = GrammarOverrides {
        delimiters: Some(Delimiters {
            statement: ("<%".into(), "%>".into()),
            expression: ("${".into(), "}".into()),
            comment: ("<%#".into(), "#%>".into()),
        }),
        ..Default::default()
    };
    // "<%" 是 "<%#" 的前缀，配置被拒绝
    assert!(matches!(compile_with("x", &overrides), Err(CompileError::Delimiters(_))));

    let overrides = GrammarOverrides {
        delimiters: Some(Delimiters {
            statement: ("<%".into(), "%>".into()),
            expression: ("${".into(), "}".into()),
            comment: ("/*".into(), "*/".into()),
        }),
        ..Default::default()
    };
    let t = compile_with("<% for x in l %>${ x }/* hidden */<% endfor %>{{ raw }}", &overrides).unwrap();
    assert_eq!(t.render(&mut ctx(json!({"l": [1, 2]}))).unwrap(), "12{{ raw }}");
}

#[test]
fn unknown_tag_is_a_compile_error() {
    let err = compile("fine\n{% nosuchtag a b %}").err().unwrap();
    assert!(matches!(&err, CompileError::UnknownTag { tag, line: 2, col: 1, .. } if tag == "nosuchtag"));
}

#[test]
fn unbalanced_templates_fail_to_compile() {
    assert!(matches!(compile("{% if x %}"), Err(CompileError::UnclosedBlock { .. })));
    assert!(matches!(compile("{% endif %}"), Err(CompileError::UnknownTag { .. })));
    assert!(matches!(
        compile("{% for a in b %}{% else %}{% endfor %}"),
        Err(CompileError::Unbalanced(_))
    ));
    assert!(matches!(
        compile("{% if a %}{% else %}{% else %}{% endif %}"),
        Err(CompileError::Unbalanced(_))
    ));
}

#[test]
fn render_writes_loop_variables_into_context() {
    let t = compile("{% for n in l %}{% endfor %}").unwrap();
    let mut c = ctx(json!({"l": [1, 2]}));
    t.render(&mut c).unwrap();
    assert_eq!(c.get("n"), Some(&Value::Int(2)));
}
