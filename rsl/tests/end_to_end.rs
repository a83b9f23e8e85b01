use approx::assert_relative_eq;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rsl::{
    Error, ErrorKind,
    asm::{Opcode, Shader},
    compiler::{self, Tree, token::TokenClass},
    grid::{Grid, GridLayout},
    types::Data,
    vm::{Lighting, ShaderInstance, State, shade_all},
};
use std::sync::Arc;

fn randomize(grid: &mut Grid, name: &str, rng: &mut StdRng) {
    match grid.data_mut(name).unwrap() {
        Data::Float(v) => v.iter_mut().for_each(|f| *f = rng.r#gen()),
        Data::Vector(v) => v
            .iter_mut()
            .for_each(|f| *f = Vector3::new(rng.r#gen(), rng.r#gen(), rng.r#gen())),
        _ => panic!("unexpected data type"),
    }
}

#[test]
fn lexer_round_trip() {
    let src = r#"
        surface plastic(float Ks = .5; string name = "a \"b\"";) {
            /* comment */ Ci = -Cs * (Ks + 1.5e-3f) <= 2 // trailing
        }
    "#;
    let project = |src: &str| {
        compiler::tokenize(src)
            .into_iter()
            .map(|t| (t.class, t.value))
            .collect::<Vec<_>>()
    };
    let tokens = compiler::tokenize(src);
    let again = compiler::render(&tokens);
    assert_eq!(project(src), project(&again));
    assert_eq!(project(&again), project(&compiler::render(&compiler::tokenize(&again))));
    assert!(tokens.iter().any(|t| t.class == TokenClass::Value));
}

fn child_text(tree: &Tree, id: rsl::compiler::tree::NodeId, i: usize) -> String {
    let c = tree.children(id)[i];
    tree.token(c).map(|t| t.text.clone()).unwrap_or_default()
}

#[test]
fn operator_precedence() {
    let mut tree = Tree::build(compiler::tokenize("a = b + c * d;")).unwrap();
    tree.remove_closing_brackets();
    tree.reparent_operators().unwrap();
    let assign = tree.children(tree.root())[0];
    assert_eq!(tree.token(assign).unwrap().text, "=");
    assert_eq!(child_text(&tree, assign, 1), "+");
    let add = tree.children(assign)[1];
    assert_eq!(child_text(&tree, add, 1), "*");

    let mut tree = Tree::build(compiler::tokenize("a = (b + c) * d;")).unwrap();
    tree.remove_closing_brackets();
    tree.reparent_operators().unwrap();
    let assign = tree.children(tree.root())[0];
    assert_eq!(child_text(&tree, assign, 1), "*");
    let mul = tree.children(assign)[1];
    assert_eq!(child_text(&tree, mul, 0), "(");
    let paren = tree.children(mul)[0];
    assert_eq!(child_text(&tree, paren, 0), "+");
}

#[test]
fn duplicate_symbols_rejected() {
    let e = Shader::from_asm(
        "surface\n.data\nKd parameter uniform float 1\nkd parameter uniform float 2\n",
        "dup",
    )
    .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Parse);
    assert_eq!(e.line(), Some(4));
}

#[test]
fn variability_must_match() {
    let shader = Arc::new(
        Shader::from_asm(
            "surface\n.data\nCi global uniform color\nA constant uniform color 1 0 0\n\
             .code\nmovvv Ci A\n",
            "uniform_ci",
        )
        .unwrap(),
    );
    let inst = ShaderInstance::new(shader);
    let mut grid = Grid::plane(GridLayout::new(4, 4));
    let e = inst.shade(&mut grid, &Lighting::default()).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Bind);
    assert!(matches!(e, Error::VariabilityMismatch { .. }));

    let shader = Arc::new(
        Shader::from_asm(
            "surface\n.data\nCi global varying color\nA constant uniform color 1 0 0\n\
             .code\nmovvv Ci A\n",
            "varying_ci",
        )
        .unwrap(),
    );
    let inst = ShaderInstance::new(shader);
    let lights = Lighting::default();
    let mut ctx = inst.bind(&mut grid, &lights).unwrap();
    assert_eq!(ctx.step().unwrap(), State::Dispatch);
    assert_eq!(ctx.opcode(), Some(Opcode::MovVV));
    assert_eq!(ctx.operand_step(0), Some(1));
    assert_eq!(ctx.operand_step(1), Some(0));
    ctx.run().unwrap();
}

#[test]
fn masked_points_are_untouched() {
    let shader = Arc::new(
        Shader::from_asm(
            "surface\n.data\nu global varying float\ns global varying float\n\
             t global varying float\n.code\naddss u s t\n",
            "add",
        )
        .unwrap(),
    );
    let layout = GridLayout::new(11, 3);
    let mut grid = Grid::plane(layout);
    let mut rng = StdRng::seed_from_u64(1234);
    for name in ["u", "s", "t"] {
        randomize(&mut grid, name, &mut rng);
    }
    let before = grid.clone();
    let k = layout.index(5, 1);

    let inst = ShaderInstance::new(shader);
    let lights = Lighting::default();
    let mut ctx = inst.bind(&mut grid, &lights).unwrap();
    ctx.set_active(k, false);
    ctx.run().unwrap();
    ctx.unbind();

    for y in 0..layout.y_dim {
        for x in 0..layout.x_dim {
            let u = grid.float_at("u", x, y).unwrap();
            if layout.index(x, y) == k {
                assert_eq!(u, before.float_at("u", x, y).unwrap());
            } else {
                let s = before.float_at("s", x, y).unwrap();
                let t = before.float_at("t", x, y).unwrap();
                assert_eq!(u, s + t);
            }
        }
    }
}

#[test]
fn constant_color_fills_grid() {
    let shader = Arc::new(
        Shader::from_asm(
            "surface\n.data\nCi global varying color\nA constant uniform color 1 0 0\n\
             .code\nmovvv Ci A\n",
            "red",
        )
        .unwrap(),
    );
    let layout = GridLayout::new(13, 7);
    let mut grid = Grid::plane(layout);
    randomize(&mut grid, "Ci", &mut StdRng::seed_from_u64(99));

    ShaderInstance::new(shader)
        .shade(&mut grid, &Lighting::default())
        .unwrap();
    for y in 0..layout.y_dim {
        for x in 0..layout.x_dim {
            assert_eq!(grid.vector_at("Ci", x, y), Some(Vector3::new(1.0, 0.0, 0.0)));
        }
    }
}

#[test]
fn divide_by_uniform_zero() {
    let shader = Arc::new(
        Shader::from_asm(
            "surface\n.data\ns global varying float\nzero constant uniform float 0\n\
             .code\ndivss s s zero\n",
            "div",
        )
        .unwrap(),
    );
    let layout = GridLayout::new(4, 2);
    let mut grid = Grid::plane(layout);
    ShaderInstance::new(shader)
        .shade(&mut grid, &Lighting::default())
        .unwrap();
    for y in 0..layout.y_dim {
        let s = grid.float_at("s", 0, y).unwrap();
        assert!(s.is_nan(), "0 / 0 should be NaN, got {s}");
        for x in 1..layout.x_dim {
            let s = grid.float_at("s", x, y).unwrap();
            assert_eq!(s, f32::INFINITY);
        }
    }
}

const PLASTIC: &str = "
surface plastic(float Ka = 1; float Kd = 0.5;)
{
    normal Nf = faceforward(normalize(N), I);
    Oi = Os;
    Ci = Os * Cs * (Ka * ambient() + Kd * diffuse(Nf));
}
";

#[test]
fn compile_and_shade() {
    let shader = Arc::new(Shader::from_rsl(PLASTIC, "plastic").unwrap());
    assert_eq!(shader.name(), "plastic");
    let inst = ShaderInstance::new(shader);
    let lights = Lighting::new(Vector3::repeat(0.2))
        .with_light(Vector3::new(0.0, 0.0, 1.0), Vector3::repeat(1.0));
    let mut grid = Grid::plane(GridLayout::new(9, 9));
    inst.shade(&mut grid, &lights).unwrap();
    for (x, y) in [(0, 0), (4, 4), (8, 8)] {
        let c = grid.vector_at("Ci", x, y).unwrap();
        assert_relative_eq!(c, Vector3::repeat(0.7), epsilon = 1e-6);
        assert_eq!(grid.vector_at("Oi", x, y), Some(Vector3::repeat(1.0)));
    }
}

#[test]
fn compile_errors_point_at_source_lines() {
    let e = compiler::compile("surface s()\n{\n    Ci = 1.2.3;\n}\n", "bad.sl").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Lex);
    assert_eq!(e.line(), Some(3));

    let e = compiler::compile("surface s()\n{\n    Ci = missing;\n}\n", "bad.sl").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Parse);
    assert_eq!(e.line(), Some(3));
}

#[test]
fn faults_are_isolated() {
    let shader = Arc::new(Shader::from_rsl(PLASTIC, "plastic").unwrap());
    let inst = ShaderInstance::new(shader);
    let mut grids = vec![
        Grid::plane(GridLayout::new(4, 4)),
        Grid::new(GridLayout::new(4, 4)),
        Grid::plane(GridLayout::new(20, 2)),
    ];
    let out = shade_all(&inst, &mut grids, &Lighting::new(Vector3::repeat(1.0)));
    assert!(out[0].is_ok());
    assert_eq!(out[1].as_ref().unwrap_err().kind(), ErrorKind::Bind);
    assert!(out[2].is_ok());
    assert_eq!(grids[2].vector_at("Ci", 19, 1), Some(Vector3::repeat(1.0)));
}

#[test]
fn load_by_extension() {
    let dir = std::env::temp_dir().join(format!("rsl-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let sl = dir.join("plastic.sl");
    std::fs::write(&sl, PLASTIC).unwrap();
    let shader = Shader::from_file(&sl).unwrap();
    assert_eq!(shader.name(), "plastic");

    let asm = dir.join("plastic.rsla");
    std::fs::write(&asm, compiler::compile(PLASTIC, "plastic.sl").unwrap()).unwrap();
    let again = Shader::from_file(&asm).unwrap();
    assert_eq!(again.code(), shader.code());

    let e = Shader::from_file(dir.join("missing.sl")).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Io);
    std::fs::remove_dir_all(&dir).unwrap();
}
