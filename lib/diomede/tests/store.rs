use diomede::model::{vocab, Quad, QuadPattern, Term, TermPattern};
use diomede::store::{StarPattern, StarTriple, StorageError, Store};
use std::error::Error;
use tempfile::TempDir;

fn ex(name: &str) -> Term {
    Term::iri(format!("http://example.org/{name}"))
}

fn graph() -> Term {
    Term::iri("tag:graph")
}

fn open_store() -> Result<(TempDir, Store), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(dir.path())?;
    Ok((dir, store))
}

fn var(name: &str) -> TermPattern {
    TermPattern::variable(name)
}

#[test]
fn simple_load_and_query() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let inserted = store.load(
        0,
        [
            Quad::new(ex("s"), ex("p1"), Term::string("o"), graph()),
            Quad::new(ex("s"), ex("p2"), Term::integer(7), graph()),
        ],
    )?;
    assert_eq!(inserted, 2);
    assert_eq!(store.len()?, 2);
    assert_eq!(store.count_quads(&QuadPattern::all())?, 2);

    let quads: Vec<Quad> = store
        .quads_for_pattern(&QuadPattern::all())?
        .collect::<Result<_, _>>()?;
    assert_eq!(quads.len(), 2);
    for quad in &quads {
        assert_eq!(quad.subject, ex("s"));
        assert_eq!(quad.graph, graph());
    }
    Ok(())
}

#[test]
fn duplicate_load_is_idempotent() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let quad = Quad::new(ex("s"), ex("p"), Term::string("o"), graph());

    // Intra-batch duplicate
    assert_eq!(store.load(0, [quad.clone(), quad.clone()])?, 1);
    assert_eq!(store.count_quads(&QuadPattern::all())?, 1);

    // Reload of the same batch
    assert_eq!(store.load(1, [quad])?, 0);
    assert_eq!(store.count_quads(&QuadPattern::all())?, 1);
    store.verify()?;
    Ok(())
}

#[test]
fn repeated_variable_filter() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("s"), ex("p1"), Term::string("o"), graph()),
            Quad::new(ex("s"), ex("p2"), Term::integer(7), graph()),
            Quad::new(ex("s"), ex("p3"), ex("s"), graph()),
            Quad::new(ex("s"), graph(), ex("s"), graph()),
        ],
    )?;

    let all_in_graph = QuadPattern::new(var("s"), var("p"), var("o"), graph());
    assert_eq!(store.count_quads(&all_in_graph)?, 4);

    let subject_equals_object = QuadPattern::new(var("s"), var("p"), var("s"), graph());
    assert_eq!(store.count_quads(&subject_equals_object)?, 2);

    let all_three_equal = QuadPattern::new(var("s"), var("s"), var("s"), graph());
    assert_eq!(store.count_quads(&all_three_equal)?, 0);

    let predicate_equals_graph = QuadPattern::new(var("s"), var("p"), var("s"), var("p"));
    assert_eq!(store.count_quads(&predicate_equals_graph)?, 1);

    // The enumerating and counting paths agree.
    let quads: Vec<Quad> = store
        .quads_for_pattern(&subject_equals_object)?
        .collect::<Result<_, _>>()?;
    assert_eq!(quads.len(), 2);
    assert!(quads.iter().all(|q| q.subject == q.object));
    Ok(())
}

#[test]
fn pattern_matching_agrees_with_results() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("a"), ex("p"), Term::string("x"), graph()),
            Quad::new(ex("b"), ex("p"), Term::string("x"), ex("other-graph")),
            Quad::new(ex("a"), ex("q"), ex("b"), graph()),
        ],
    )?;
    let patterns = [
        QuadPattern::all(),
        QuadPattern::new(ex("a"), var("p"), var("o"), var("g")),
        QuadPattern::new(var("s"), ex("p"), Term::string("x"), var("g")),
        QuadPattern::new(var("s"), var("p"), var("o"), graph()),
        QuadPattern::new(var("s"), var("p"), var("s"), var("g")),
    ];
    let every_quad: Vec<Quad> = store
        .quads_for_pattern(&QuadPattern::all())?
        .collect::<Result<_, _>>()?;
    for pattern in &patterns {
        let matched: Vec<Quad> = store
            .quads_for_pattern(pattern)?
            .collect::<Result<_, _>>()?;
        assert_eq!(matched.len() as u64, store.count_quads(pattern)?);
        for quad in &every_quad {
            assert_eq!(
                pattern.matches(quad),
                matched.contains(quad),
                "pattern {pattern} disagrees on {quad}"
            );
        }
    }
    Ok(())
}

#[test]
fn unknown_bound_term_matches_nothing() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(0, [Quad::new(ex("s"), ex("p"), Term::string("o"), graph())])?;
    let pattern = QuadPattern::new(ex("missing"), var("p"), var("o"), var("g"));
    assert_eq!(store.count_quads(&pattern)?, 0);
    assert_eq!(store.quads_for_pattern(&pattern)?.count(), 0);
    Ok(())
}

#[test]
fn bindings_report_variables() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("a"), ex("p"), Term::integer(1), graph()),
            Quad::new(ex("b"), ex("p"), Term::integer(2), graph()),
        ],
    )?;
    let pattern = QuadPattern::new(var("subject"), ex("p"), var("value"), graph());
    let mut subjects = Vec::new();
    for binding in store.bindings_for_pattern(&pattern)? {
        let binding = binding?;
        assert_eq!(binding.len(), 2);
        assert!(binding.contains_key("value"));
        subjects.push(binding["subject"].clone());
    }
    subjects.sort();
    assert_eq!(subjects, vec![ex("a"), ex("b")]);
    Ok(())
}

#[test]
fn graphs_and_graph_terms() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("s"), ex("p"), Term::string("o"), graph()),
            Quad::new(ex("s"), ex("p"), Term::string("o"), ex("g2")),
        ],
    )?;
    let mut graphs = store.graphs()?;
    graphs.sort();
    let mut expected = vec![graph(), ex("g2")];
    expected.sort();
    assert_eq!(graphs, expected);

    let terms = store.graph_terms(&graph())?;
    assert!(terms.contains(&ex("s")));
    assert!(terms.contains(&ex("p")));
    assert!(terms.contains(&Term::string("o")));
    assert!(terms.contains(&graph()));
    assert!(!terms.contains(&ex("g2")));
    Ok(())
}

#[test]
fn graph_drop_is_local() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("s"), ex("p"), Term::string("o"), graph()),
            Quad::new(ex("s"), ex("q"), Term::integer(1), graph()),
            Quad::new(ex("s"), ex("p"), Term::string("o"), ex("g2")),
        ],
    )?;
    store.add_full_index("spog")?;
    assert!(store.drop_graph(&graph())?);

    let in_dropped = QuadPattern::new(var("s"), var("p"), var("o"), graph());
    assert_eq!(store.count_quads(&in_dropped)?, 0);
    assert_eq!(store.graphs()?, vec![ex("g2")]);
    let in_other = QuadPattern::new(var("s"), var("p"), var("o"), ex("g2"));
    assert_eq!(store.count_quads(&in_other)?, 1);

    // Orphaned terms keep their dictionary bindings.
    assert!(store.term_id(&ex("q"))?.is_some());
    store.verify()?;

    // Dropping again reports absence.
    assert!(!store.drop_graph(&graph())?);
    Ok(())
}

#[test]
fn add_and_drop_full_index() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        (0..100).map(|i| {
            Quad::new(
                ex(&format!("s{}", i % 10)),
                ex(&format!("p{}", i % 3)),
                Term::integer(i),
                graph(),
            )
        }),
    )?;
    assert_eq!(store.full_indexes(), vec!["gpso".to_owned()]);

    store.add_full_index("posg")?;
    assert_eq!(
        store.full_indexes(),
        vec!["gpso".to_owned(), "posg".to_owned()]
    );
    store.verify()?;

    // The new index answers predicate-bound patterns.
    let by_predicate = QuadPattern::new(var("s"), ex("p0"), var("o"), var("g"));
    assert_eq!(
        store.best_index_name([false, true, false, false]),
        Some("posg".to_owned())
    );
    let quads: Vec<Quad> = store
        .quads_for_pattern(&by_predicate)?
        .collect::<Result<_, _>>()?;
    assert_eq!(quads.len() as u64, store.count_quads(&by_predicate)?);
    assert!(quads.iter().all(|q| q.predicate == ex("p0")));

    // New quads fan out to the new index too.
    store.load(1, [Quad::new(ex("s"), ex("p0"), Term::string("x"), graph())])?;
    store.verify()?;

    store.drop_full_index("posg")?;
    assert_eq!(store.full_indexes(), vec!["gpso".to_owned()]);
    store.verify()?;
    assert!(matches!(
        store.drop_full_index("posg"),
        Err(StorageError::Index(_))
    ));
    Ok(())
}

#[test]
fn ordered_iteration_requires_the_index() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("b"), ex("p"), Term::integer(1), graph()),
            Quad::new(ex("a"), ex("p"), Term::integer(2), graph()),
        ],
    )?;
    assert!(matches!(
        store.quads_ordered(&QuadPattern::all(), "spog"),
        Err(StorageError::Index(_))
    ));
    store.add_full_index("spog")?;
    let quads: Vec<Quad> = store
        .quads_ordered(&QuadPattern::all(), "spog")?
        .collect::<Result<_, _>>()?;
    assert_eq!(quads.len(), 2);
    // Subject ids follow interning order: b was interned before a.
    let b_id = store.term_id(&ex("b"))?.unwrap();
    let a_id = store.term_id(&ex("a"))?.unwrap();
    assert!(b_id < a_id);
    assert_eq!(quads[0].subject, ex("b"));
    assert_eq!(quads[1].subject, ex("a"));
    Ok(())
}

#[test]
fn available_orders_strip_the_bound_prefix() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let bound_graph = QuadPattern::new(var("s"), var("p"), var("o"), graph());
    assert_eq!(store.available_orders(&bound_graph)?, vec!["pso".to_owned()]);
    store.add_full_index("gspo")?;
    let mut orders = store.available_orders(&bound_graph)?;
    orders.sort();
    assert_eq!(orders, vec!["pso".to_owned(), "spo".to_owned()]);
    assert_eq!(
        store.available_orders(&QuadPattern::all())?,
        vec!["gpso".to_owned(), "gspo".to_owned()]
    );
    Ok(())
}

#[test]
fn dictionary_round_trips() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let terms = [
        ex("s"),
        Term::blank("b0"),
        Term::string("o"),
        Term::integer(-3),
        Term::language_literal("chat", "fr"),
        Term::datatype_literal("1.5", "http://www.w3.org/2001/XMLSchema#decimal"),
        Term::iri("urn:uuid:08b7a198-7eaf-4a6a-b0f4-258cb7e299fe"),
        Term::blank("08B7A198-7EAF-4A6A-B0F4-258CB7E299FE"),
    ];
    let quads = terms
        .iter()
        .map(|term| Quad::new(ex("s"), ex("p"), term.clone(), graph()));
    store.load(0, quads)?;
    for term in &terms {
        let id = store.term_id(term)?.expect("interned term has an id");
        assert_eq!(store.id_term(id)?.as_ref(), Some(term));
    }
    // Ids start at 1; 0 stays the unbound sentinel.
    for (id, _) in store.terms()? {
        assert!(id >= 1);
    }
    assert_eq!(store.terms()?.len(), store.term_hashes()?.len());
    Ok(())
}

#[test]
fn characteristic_set_cardinalities() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let g = ex("g");
    let rdf_type = Term::iri(vocab::rdf::TYPE);
    let thing = ex("Thing");
    let name = ex("name");
    let version = ex("version");

    let mut quads = Vec::new();
    let mut subject = 0;
    let mut push_subjects = |count: usize, with_name: bool, with_version: bool, quads: &mut Vec<Quad>| {
        for _ in 0..count {
            let s = ex(&format!("subject{subject}"));
            subject += 1;
            quads.push(Quad::new(s.clone(), rdf_type.clone(), thing.clone(), g.clone()));
            if with_name {
                quads.push(Quad::new(
                    s.clone(),
                    name.clone(),
                    Term::string(format!("name {subject}")),
                    g.clone(),
                ));
            }
            if with_version {
                quads.push(Quad::new(
                    s.clone(),
                    version.clone(),
                    Term::integer(subject),
                    g.clone(),
                ));
            }
        }
    };
    push_subjects(10, false, false, &mut quads);
    push_subjects(5, true, false, &mut quads);
    push_subjects(5, false, true, &mut quads);
    push_subjects(5, true, true, &mut quads);
    assert_eq!(store.load(0, quads)?, 45);

    store.compute_characteristic_sets(true)?;
    let dataset = store.characteristic_sets(&g, true)?;
    assert!(dataset.accurate);
    assert_eq!(dataset.sets.len(), 4);
    assert_eq!(dataset.sets.iter().map(|s| s.count).sum::<u64>(), 25);
    // Every subject is typed, so every set records one type combination.
    assert_eq!(dataset.type_sets.len(), 4);
    for (set, combos) in dataset.sets.iter().zip(&dataset.type_sets) {
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].count, set.count);
        assert_eq!(combos[0].types, vec![store.term_id(&thing)?.unwrap()]);
    }

    let star = |predicates: &[&Term]| {
        StarPattern::new(
            predicates
                .iter()
                .map(|p| StarTriple::new(Some((*p).clone()), None))
                .collect(),
        )
    };
    let estimate = |pattern: &StarPattern| -> Result<u64, StorageError> {
        Ok(store.star_cardinality(&g, pattern)?.round() as u64)
    };

    let any = StarPattern::new(vec![StarTriple::new(None, None)]);
    assert_eq!(estimate(&any)?, 45);
    assert_eq!(estimate(&star(&[&rdf_type]))?, 25);
    assert_eq!(estimate(&star(&[&name]))?, 10);
    assert_eq!(estimate(&star(&[&rdf_type, &name]))?, 10);
    assert_eq!(estimate(&star(&[&rdf_type, &name, &version]))?, 5);

    // Aggregated set: distinct subjects carrying type and name.
    let aggregated = store
        .aggregated_characteristic_set(&g, &star(&[&rdf_type, &name]))?
        .expect("two sets match");
    assert_eq!(aggregated.count, 10);
    let type_id = store.term_id(&rdf_type)?.unwrap();
    let name_id = store.term_id(&name)?.unwrap();
    let mut predicates: Vec<u64> = aggregated.predicate_ids().collect();
    predicates.sort_unstable();
    let mut expected = vec![type_id, name_id];
    expected.sort_unstable();
    assert_eq!(predicates, expected);

    assert_eq!(store.predicate_cardinality(&g, &name)?, 10);
    assert_eq!(store.predicate_cardinality(&g, &rdf_type)?, 25);
    Ok(())
}

#[test]
fn characteristic_sets_report_staleness() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let g = ex("g");
    store.load(0, [Quad::new(ex("s"), ex("p"), Term::integer(1), g.clone())])?;
    store.compute_characteristic_sets(false)?;
    assert!(store.characteristic_sets(&g, false)?.accurate);

    store.load(1, [Quad::new(ex("s2"), ex("p"), Term::integer(2), g.clone())])?;
    assert!(!store.characteristic_sets(&g, false)?.accurate);

    store.drop_characteristic_sets()?;
    let dataset = store.characteristic_sets(&g, false)?;
    assert!(dataset.sets.is_empty());
    assert!(!dataset.accurate);
    Ok(())
}

#[test]
fn object_selectivity_scales_estimates() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    let g = ex("g");
    let p = ex("p");
    // Ten subjects share one predicate; half point at the same object.
    let mut quads = Vec::new();
    for i in 0..10 {
        let object = if i % 2 == 0 {
            Term::string("even")
        } else {
            Term::string(format!("odd {i}"))
        };
        quads.push(Quad::new(ex(&format!("s{i}")), p.clone(), object, g.clone()));
    }
    store.load(0, quads)?;
    store.compute_characteristic_sets(false)?;

    let bound_object = StarPattern::new(vec![StarTriple::new(
        Some(p.clone()),
        Some(Term::string("even")),
    )]);
    let estimate = store.star_cardinality(&g, &bound_object)?;
    assert!((estimate - 5.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn verify_passes_after_every_ingestion() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.verify()?;
    store.load(
        0,
        (0..500).map(|i| {
            Quad::new(
                ex(&format!("s{}", i % 50)),
                ex(&format!("p{}", i % 7)),
                Term::integer(i),
                ex(&format!("g{}", i % 3)),
            )
        }),
    )?;
    store.verify()?;
    store.add_full_index("ospg")?;
    store.verify()?;
    Ok(())
}

#[test]
fn queries_survive_without_any_index() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        0,
        [
            Quad::new(ex("a"), ex("p"), Term::string("x"), graph()),
            Quad::new(ex("b"), ex("p"), Term::integer(1), graph()),
        ],
    )?;
    store.drop_full_index("gpso")?;
    assert!(store.full_indexes().is_empty());
    assert_eq!(store.best_index_name([false, false, false, true]), None);

    // The planner falls back to scanning the quad table.
    let pattern = QuadPattern::new(ex("a"), var("p"), var("o"), var("g"));
    assert_eq!(store.count_quads(&pattern)?, 1);
    assert_eq!(store.count_quads(&QuadPattern::all())?, 2);

    // Ingestion deduplication works off the quad table too.
    assert_eq!(
        store.load(1, [Quad::new(ex("a"), ex("p"), Term::string("x"), graph())])?,
        0
    );
    store.verify()?;

    // An index built afterwards covers the existing rows.
    store.add_full_index("gpso")?;
    store.verify()?;
    assert_eq!(store.count_quads(&QuadPattern::all())?, 2);
    Ok(())
}

#[test]
fn prefix_table() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.set_prefix("ex", "http://example.org/")?;
    store.set_prefix("schema", "http://schema.org/")?;
    let prefixes = store.prefixes()?;
    assert_eq!(prefixes.len(), 2);
    assert!(prefixes.contains(&("ex".to_owned(), "http://example.org/".to_owned())));

    assert!(store.remove_prefix("ex")?);
    assert!(!store.remove_prefix("ex")?);
    store.clear_prefixes()?;
    assert!(store.prefixes()?.is_empty());
    Ok(())
}

#[test]
fn effective_version_follows_the_load_tag() -> Result<(), Box<dyn Error>> {
    let (_dir, store) = open_store()?;
    store.load(
        1_700_000_000,
        [Quad::new(ex("s"), ex("p"), Term::string("o"), graph())],
    )?;
    assert_eq!(store.effective_version()?, Some(1_700_000_000));
    Ok(())
}

#[test]
fn store_reopens_with_its_data() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    {
        let store = Store::open(dir.path())?;
        store.load(0, [Quad::new(ex("s"), ex("p"), Term::string("o"), graph())])?;
        store.add_full_index("spog")?;
    }
    let store = Store::open_existing(dir.path())?.expect("store exists");
    assert_eq!(store.len()?, 1);
    let mut indexes = store.full_indexes();
    indexes.sort();
    assert_eq!(indexes, vec!["gpso".to_owned(), "spog".to_owned()]);
    store.verify()?;

    assert!(Store::open_existing(dir.path().join("absent"))?.is_none());
    Ok(())
}
